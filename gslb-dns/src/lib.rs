//! Authoritative A-record answering over the shared host state.

pub mod error;
pub mod index;
pub mod resolver;
pub mod server;

pub use error::{Error, Result};
pub use index::WeightedEntry;
pub use resolver::Resolver;
pub use server::{DnsServer, DnsServerStats};
