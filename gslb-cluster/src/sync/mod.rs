//! Local discovery → store → peers.

pub mod annotations;
pub mod conflict;
pub mod events;
pub mod synchronizer;

pub use annotations::AnnotationKeys;
pub use conflict::{ExclusionReason, Resolution};
pub use events::{ResourceEvent, ResourceKind};
pub use synchronizer::{SyncReport, Synchronizer, SynchronizerConfig};
