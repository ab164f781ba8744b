//! Liveness between federated clusters
//!
//! Three independent timers, all leader-only:
//! 1. Emit: store our own heartbeat, then POST it to every peer
//! 2. Check: evict clusters whose heartbeat is older than the timeout
//! 3. Repair: recompute every merged projection from the per-cluster batches
//!
//! Emit and check are skipped entirely when no peers are configured.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gslb_core::models::heartbeat_expired;
use gslb_core::{Config, HostStateStore, LeadershipCell};

use crate::error::Result;
use crate::peer::{broadcast_heartbeat, PeerTransport};

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub cluster_identifier: String,
    pub set_interval: Duration,
    pub check_interval: Duration,
    pub timeout_secs: i64,
    pub cache_repair_interval: Duration,
}

impl HeartbeatConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            cluster_identifier: config.cluster.identifier.clone(),
            set_interval: config.cluster.heartbeat_set_interval(),
            check_interval: config.cluster.heartbeat_check_interval(),
            timeout_secs: i64::try_from(config.cluster.heartbeat_timeout_secs).unwrap_or(i64::MAX),
            cache_repair_interval: config.cluster.cache_repair_interval(),
        }
    }
}

pub struct HeartbeatMonitor {
    store: Arc<dyn HostStateStore>,
    peers: Arc<dyn PeerTransport>,
    leadership: Arc<LeadershipCell>,
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    pub fn new(
        store: Arc<dyn HostStateStore>,
        peers: Arc<dyn PeerTransport>,
        leadership: Arc<LeadershipCell>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            store,
            peers,
            leadership,
            config,
        }
    }

    fn peer_work_enabled(&self) -> bool {
        self.leadership.is_leader() && !self.peers.peers().is_empty()
    }

    /// Record our own heartbeat and announce it to every peer.
    pub async fn emit_once(&self) -> Result<()> {
        self.store
            .set_cluster_heartbeat(&self.config.cluster_identifier, Utc::now())
            .await?;
        broadcast_heartbeat(&self.peers);
        Ok(())
    }

    /// Evict every other cluster whose heartbeat expired at `now`.
    ///
    /// Returns the evicted identifiers. Failure to evict one cluster is logged
    /// and does not stop the others.
    pub async fn check_once(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut evicted = Vec::new();
        for cluster in self.store.get_cluster_identifiers().await? {
            if cluster == self.config.cluster_identifier {
                continue;
            }
            let last = match self.store.get_cluster_heartbeat_time(&cluster).await {
                Ok(last) => last,
                Err(e) => {
                    warn!(cluster = %cluster, error = %e, "Failed to read heartbeat");
                    continue;
                }
            };
            if !heartbeat_expired(last, now, self.config.timeout_secs) {
                continue;
            }

            warn!(
                cluster = %cluster,
                last_heartbeat = ?last,
                timeout_secs = self.config.timeout_secs,
                "Cluster heartbeat expired, evicting"
            );
            match self.evict(&cluster).await {
                Ok(()) => evicted.push(cluster),
                Err(e) => error!(cluster = %cluster, error = %e, "Failed to evict cluster"),
            }
        }

        if !evicted.is_empty() {
            let repaired = self.store.synchronize_caches().await?;
            info!(evicted = ?evicted, repaired, "Eviction complete");
        }
        Ok(evicted)
    }

    async fn evict(&self, cluster: &str) -> Result<()> {
        for hostname in self.store.get_hostnames(Some(cluster)).await? {
            self.store.remove_cluster_hostname(cluster, &hostname).await?;
        }
        self.store.remove_cluster(cluster).await?;
        Ok(())
    }

    pub async fn repair_once(&self) -> Result<usize> {
        Ok(self.store.synchronize_caches().await?)
    }

    /// Spawn the three timers. Returns the `JoinHandle` of the combined loop.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut emit_timer = interval(self.config.set_interval);
        let mut check_timer = interval(self.config.check_interval);
        let mut repair_timer = interval(self.config.cache_repair_interval);
        for timer in [&mut emit_timer, &mut check_timer, &mut repair_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Heartbeat monitor shutting down");
                        return;
                    }
                    _ = emit_timer.tick() => {
                        if self.peer_work_enabled() {
                            guarded("heartbeat emit", self.emit_once()).await;
                        }
                    }
                    _ = check_timer.tick() => {
                        if self.peer_work_enabled() {
                            guarded("heartbeat check", self.check_once(Utc::now())).await;
                        }
                    }
                    _ = repair_timer.tick() => {
                        if self.leadership.is_leader() {
                            guarded("cache repair", self.repair_once()).await;
                        }
                    }
                }
            }
        })
    }
}

/// Run one tick, logging errors and containing panics so the loop keeps going.
async fn guarded<T, F>(task: &'static str, fut: F)
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(_)) => debug!(task, "Tick complete"),
        Ok(Err(e)) => warn!(task, error = %e, "Tick failed"),
        Err(_) => error!(task, "Tick panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::MockPeerTransport;
    use chrono::Duration as ChronoDuration;
    use gslb_core::config::PeerConfig;
    use gslb_core::models::HostIp;
    use gslb_core::notify::LocalNotifier;
    use gslb_core::store::{KeyValueHostState, MemoryKv};

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            cluster_identifier: "east".to_string(),
            set_interval: Duration::from_secs(5),
            check_interval: Duration::from_secs(10),
            timeout_secs: 30,
            cache_repair_interval: Duration::from_secs(300),
        }
    }

    fn peer(id: &str) -> PeerConfig {
        PeerConfig {
            cluster_identifier: id.to_string(),
            url: format!("http://{id}.example.com"),
            api_key: format!("{id}-key"),
        }
    }

    fn store() -> Arc<dyn HostStateStore> {
        Arc::new(KeyValueHostState::new(
            Arc::new(MemoryKv::new()),
            Arc::new(LocalNotifier::new()),
        ))
    }

    fn monitor(store: Arc<dyn HostStateStore>, mock: MockPeerTransport) -> HeartbeatMonitor {
        HeartbeatMonitor::new(store, Arc::new(mock), Arc::new(LeadershipCell::new(true)), config())
    }

    #[tokio::test]
    async fn test_expired_cluster_is_evicted() {
        let store = store();
        let now = Utc::now();
        store
            .set_host_ips("app.example.com", "west", &[HostIp::new("10.0.1.1", 0, 50, "")])
            .await
            .unwrap();
        store
            .set_host_ips("app.example.com", "east", &[HostIp::new("10.0.0.1", 0, 50, "")])
            .await
            .unwrap();
        store
            .set_cluster_heartbeat("west", now - ChronoDuration::seconds(120))
            .await
            .unwrap();

        let monitor = monitor(store.clone(), MockPeerTransport::new());
        let evicted = monitor.check_once(now).await.unwrap();

        assert_eq!(evicted, vec!["west".to_string()]);
        assert!(!store.get_cluster_identifiers().await.unwrap().contains("west"));
        let host = store.get_host_information("app.example.com").await.unwrap().unwrap();
        assert!(host.host_ips.iter().all(|ip| ip.cluster_identifier == "east"));
    }

    #[tokio::test]
    async fn test_self_is_never_evicted() {
        let store = store();
        let now = Utc::now();
        store
            .set_cluster_heartbeat("east", now - ChronoDuration::seconds(600))
            .await
            .unwrap();

        let monitor = monitor(store.clone(), MockPeerTransport::new());
        assert!(monitor.check_once(now).await.unwrap().is_empty());
        assert!(store.get_cluster_identifiers().await.unwrap().contains("east"));
    }

    #[tokio::test]
    async fn test_fresh_cluster_survives() {
        let store = store();
        let now = Utc::now();
        store
            .set_cluster_heartbeat("west", now - ChronoDuration::seconds(10))
            .await
            .unwrap();

        let monitor = monitor(store, MockPeerTransport::new());
        assert!(monitor.check_once(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_records_and_posts() {
        let store = store();
        let mut mock = MockPeerTransport::new();
        mock.expect_peers().returning(|| vec![peer("west")]);
        mock.expect_post_heartbeat().times(1).returning(|_| Ok(()));

        let monitor = monitor(store.clone(), mock);
        monitor.emit_once().await.unwrap();
        // Let the spawned POST run
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get_cluster_heartbeat_time("east").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_peer_work_without_peers_or_leadership() {
        let mut no_peers = MockPeerTransport::new();
        no_peers.expect_peers().returning(Vec::new);
        assert!(!monitor(store(), no_peers).peer_work_enabled());

        let mut with_peers = MockPeerTransport::new();
        with_peers.expect_peers().returning(|| vec![peer("west")]);
        let follower = HeartbeatMonitor::new(
            store(),
            Arc::new(with_peers),
            Arc::new(LeadershipCell::new(false)),
            config(),
        );
        assert!(!follower.peer_work_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_cancel() {
        let mut mock = MockPeerTransport::new();
        mock.expect_peers().returning(Vec::new);
        let monitor = Arc::new(monitor(store(), mock));
        let cancel = CancellationToken::new();

        let handle = monitor.start(cancel.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
