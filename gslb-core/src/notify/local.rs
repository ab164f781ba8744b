use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::{HostChangeNotifier, NOTIFICATION_CHANNEL_CAPACITY};

/// In-process fan-out for deployments where writers and the resolver share a process
#[derive(Clone)]
pub struct LocalNotifier {
    sender: broadcast::Sender<String>,
}

impl Default for LocalNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNotifier {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self { sender }
    }
}

#[async_trait]
impl HostChangeNotifier for LocalNotifier {
    async fn notify(&self, hostname: &str) {
        // No receivers is fine: nothing to invalidate yet.
        let receivers = self.sender.send(hostname.to_string()).unwrap_or(0);
        trace!(hostname = %hostname, receivers, "Host change announced");
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let notifier = LocalNotifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.notify("app.example.com").await;

        assert_eq!(first.recv().await.unwrap(), "app.example.com");
        assert_eq!(second.recv().await.unwrap(), "app.example.com");
    }

    #[tokio::test]
    async fn test_notify_without_subscribers() {
        let notifier = LocalNotifier::new();
        notifier.notify("app.example.com").await;
        let mut late = notifier.subscribe();
        assert!(late.try_recv().is_err());
    }
}
