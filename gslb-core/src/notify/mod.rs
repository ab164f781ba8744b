//! Change notification channel between store writers and the resolver.
//!
//! Writers announce a hostname whose merged projection changed; subscribers
//! re-read that hostname from the store. The payload is only the hostname.

pub mod local;
pub mod redis_pubsub;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use self::local::LocalNotifier;
pub use self::redis_pubsub::RedisNotifier;

/// Capacity of the in-process fan-out. Slow subscribers that fall further
/// behind observe `RecvError::Lagged` and must reload everything.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

#[async_trait]
pub trait HostChangeNotifier: Send + Sync {
    /// Announce that `hostname` changed. Delivery failures are logged, not returned.
    async fn notify(&self, hostname: &str);

    fn subscribe(&self) -> broadcast::Receiver<String>;
}
