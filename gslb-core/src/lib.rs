pub mod models;
pub mod store;
pub mod notify;
pub mod config;
pub mod error;
pub mod logging;
pub mod random;
pub mod leadership;
pub mod health;

pub use config::Config;
pub use error::{Error, Result};
pub use health::HealthState;
pub use leadership::{LeadershipCell, LeadershipWatch};
pub use notify::HostChangeNotifier;
pub use random::RandomSource;
pub use store::HostStateStore;
