pub mod sync;
pub mod discovery;
pub mod peer;
pub mod heartbeat;
pub mod error;

pub use error::{Error, Result};
pub use discovery::{ClusterResources, SnapshotFileResources, StaticResources};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use peer::{HttpPeerTransport, PeerTransport};
pub use sync::{ResourceEvent, SyncReport, Synchronizer, SynchronizerConfig};
