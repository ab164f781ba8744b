//! Cross-process change notification over Redis Pub/Sub.
//!
//! `notify` publishes the bare hostname on the configured channel. A background
//! subscriber forwards everything received on that channel, including this
//! process's own publishes, into a local broadcast. Nothing is delivered
//! locally without the Redis round trip, so each change arrives exactly once.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{HostChangeNotifier, NOTIFICATION_CHANNEL_CAPACITY};
use crate::error::{Error, Result};

/// Initial backoff delay for subscriber reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for subscriber reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Why a subscriber session ended
enum SubscriberExit {
    Cancelled,
    /// Connected, then the message stream ended
    Disconnected,
    ConnectFailed(Error),
}

pub struct RedisNotifier {
    client: redis::Client,
    publisher: ConnectionManager,
    channel: String,
    op_timeout: Duration,
    local_sender: broadcast::Sender<String>,
}

impl RedisNotifier {
    /// Connect the publishing side. Call [`RedisNotifier::start`] to receive.
    pub async fn connect(url: &str, channel: String, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Configuration(format!("Invalid Redis URL: {e}")))?;
        let publisher = timeout(op_timeout, client.get_connection_manager())
            .await
            .map_err(|_| Error::Timeout("Redis connection timed out".to_string()))??;
        let (local_sender, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            publisher,
            channel,
            op_timeout,
            local_sender,
        })
    }

    /// Spawn the subscriber task; it reconnects with exponential backoff until cancelled.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let client = self.client.clone();
        let channel = self.channel.clone();
        let sender = self.local_sender.clone();
        let op_timeout = self.op_timeout;

        tokio::spawn(async move {
            let mut backoff_secs = INITIAL_BACKOFF_SECS;

            loop {
                match Self::run_subscriber(&client, &channel, &sender, op_timeout, &cancel).await {
                    SubscriberExit::Cancelled => {
                        info!("Host change subscriber cancelled");
                        return;
                    }
                    SubscriberExit::Disconnected => {
                        // The server was reachable a moment ago.
                        error!(
                            "Host change subscription lost, reconnecting after {}s",
                            INITIAL_BACKOFF_SECS
                        );
                        backoff_secs = INITIAL_BACKOFF_SECS;
                    }
                    SubscriberExit::ConnectFailed(e) => {
                        error!(
                            error = %e,
                            backoff_secs,
                            "Host change subscriber failed to connect, retrying after backoff"
                        );
                    }
                }

                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Host change subscriber cancelled during backoff");
                        return;
                    }
                    () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }

                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        })
    }

    async fn run_subscriber(
        client: &redis::Client,
        channel: &str,
        sender: &broadcast::Sender<String>,
        op_timeout: Duration,
        cancel: &CancellationToken,
    ) -> SubscriberExit {
        let mut pubsub = match timeout(op_timeout, client.get_async_pubsub()).await {
            Ok(Ok(pubsub)) => pubsub,
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(e.into()),
            Err(_) => {
                return SubscriberExit::ConnectFailed(Error::Timeout(
                    "Timed out getting Redis Pub/Sub connection".to_string(),
                ))
            }
        };

        match timeout(op_timeout, pubsub.subscribe(channel)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(e.into()),
            Err(_) => {
                return SubscriberExit::ConnectFailed(Error::Timeout(format!(
                    "Timed out subscribing to {channel}"
                )))
            }
        }

        info!(channel = %channel, "Subscribed to host change channel");

        let mut stream = pubsub.on_message();
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => return SubscriberExit::Cancelled,
                msg = stream.next() => msg,
            };
            let Some(msg) = msg else {
                return SubscriberExit::Disconnected;
            };

            match msg.get_payload::<String>() {
                Ok(hostname) => {
                    debug!(hostname = %hostname, "Host change received");
                    // Nobody listening yet is not an error.
                    let _ = sender.send(hostname);
                }
                Err(e) => {
                    warn!(error = %e, channel = %channel, "Invalid host change payload");
                }
            }
        }
    }
}

#[async_trait]
impl HostChangeNotifier for RedisNotifier {
    async fn notify(&self, hostname: &str) {
        let mut conn = self.publisher.clone();
        let result = timeout(
            self.op_timeout,
            conn.publish::<_, _, i64>(&self.channel, hostname),
        )
        .await;

        match result {
            Ok(Ok(receivers)) => {
                debug!(hostname = %hostname, receivers, "Host change published");
            }
            Ok(Err(e)) => {
                warn!(hostname = %hostname, error = %e, "Failed to publish host change");
            }
            Err(_) => {
                warn!(hostname = %hostname, "Timed out publishing host change");
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.local_sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_publish_round_trip() {
        let notifier = RedisNotifier::connect(
            "redis://127.0.0.1:6379",
            "gslb.test.hostnames.changed".to_string(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let cancel = CancellationToken::new();
        let handle = notifier.start(cancel.clone());
        let mut rx = notifier.subscribe();

        // Give the subscriber a moment to attach.
        tokio::time::sleep(Duration::from_millis(200)).await;
        notifier.notify("app.example.com").await;

        let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received, "app.example.com");

        cancel.cancel();
        handle.await.unwrap();
    }
}
