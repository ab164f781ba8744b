pub mod monitor;

pub use monitor::{HeartbeatConfig, HeartbeatMonitor};
