//! Full local-discovery pass and its triggers.

use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gslb_core::models::HostUpdate;
use gslb_core::{Config, HostStateStore, LeadershipCell};

use super::annotations::{build_batch, AnnotationKeys};
use super::conflict::{self, ExclusionReason};
use super::events::ResourceEvent;
use crate::discovery::resources::{
    endpoint_counts, ingress_candidates, load_balancer_services, service_candidates,
    services_to_track,
};
use crate::discovery::{ClusterResources, Endpoints, Ingress, Service};
use crate::error::Result;
use crate::peer::{propagate_host, PeerTransport};

#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    pub cluster_identifier: String,
    pub hostname_annotation: String,
    pub annotation_keys: AnnotationKeys,
    /// How long a trigger waits for an in-flight pass before running anyway
    pub sync_wait_timeout: Duration,
    pub resync_interval: Duration,
}

impl SynchronizerConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            cluster_identifier: config.cluster.identifier.clone(),
            hostname_annotation: config.discovery.hostname_annotation.clone(),
            annotation_keys: AnnotationKeys {
                priority: config.discovery.priority_annotation.clone(),
                weight: config.discovery.weight_annotation.clone(),
            },
            sync_wait_timeout: config.cluster.sync_wait_timeout(),
            resync_interval: config.cluster.resync_interval(),
        }
    }
}

/// Outcome of one full pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Valid hostnames written to the store
    pub written: usize,
    /// Hostnames whose merged view changed and were propagated
    pub changed: Vec<String>,
    /// Hostnames this cluster stopped offering
    pub withdrawn: Vec<String>,
    pub invalid: BTreeMap<String, BTreeSet<ExclusionReason>>,
}

pub struct Synchronizer {
    store: Arc<dyn HostStateStore>,
    resources: Arc<dyn ClusterResources>,
    peers: Arc<dyn PeerTransport>,
    leadership: Arc<LeadershipCell>,
    config: SynchronizerConfig,
    pass_guard: Mutex<()>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn HostStateStore>,
        resources: Arc<dyn ClusterResources>,
        peers: Arc<dyn PeerTransport>,
        leadership: Arc<LeadershipCell>,
        config: SynchronizerConfig,
    ) -> Self {
        Self {
            store,
            resources,
            peers,
            leadership,
            config,
            pass_guard: Mutex::new(()),
        }
    }

    /// Rediscover everything this cluster exposes and publish the result.
    ///
    /// Returns `None` when this process is not the leader.
    pub async fn run_full_pass(&self) -> Result<Option<SyncReport>> {
        if !self.leadership.is_leader() {
            debug!("Not leader, skipping synchronization");
            return Ok(None);
        }

        // Rate limit, not exclusion: after the wait we run regardless.
        let _guard = match timeout(self.config.sync_wait_timeout, self.pass_guard.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(
                    wait_secs = self.config.sync_wait_timeout.as_secs(),
                    "Previous synchronization still running, proceeding anyway"
                );
                None
            }
        };

        let cluster = self.config.cluster_identifier.as_str();

        let (ingresses, services, endpoints) = tokio::try_join!(
            self.resources.list_ingresses(),
            self.resources.list_services(),
            self.resources.list_endpoints(),
        )?;
        let counts = endpoint_counts(&endpoints);

        let (ingress_claims, lb_services) = tokio::join!(
            async { ingress_candidates(&ingresses, &counts) },
            async { load_balancer_services(&services) },
        );
        let service_claims =
            service_candidates(&lb_services, &counts, &self.config.hostname_annotation);

        self.reset_tracked_services(&ingresses, &lb_services, &counts)
            .await;
        self.record_resource_versions(&ingresses, &services, &endpoints)
            .await;

        let resolution = conflict::resolve(ingress_claims.into_iter().chain(service_claims).collect());

        // Read before writing so this pass's own writes don't count as prior ownership.
        let previously_owned = self.store.get_hostnames(Some(cluster)).await?;

        let mut report = SyncReport {
            invalid: resolution.invalid,
            ..SyncReport::default()
        };

        for (hostname, winner) in &resolution.valid {
            let batch = build_batch(winner, &self.config.annotation_keys, cluster);
            match self.store.set_host_ips(hostname, cluster, &batch).await {
                Ok(changed) => {
                    report.written += 1;
                    if changed {
                        propagate_host(&self.peers, HostUpdate::from_batch(hostname, &batch));
                        report.changed.push(hostname.clone());
                    }
                }
                Err(e) => {
                    warn!(hostname = %hostname, error = %e, "Failed to store host batch");
                }
            }
        }

        for hostname in previously_owned
            .iter()
            .filter(|h| !resolution.valid.contains_key(*h))
        {
            match self.store.set_host_ips(hostname, cluster, &[]).await {
                Ok(_) => {
                    propagate_host(&self.peers, HostUpdate::from_batch(hostname, &[]));
                    report.withdrawn.push(hostname.clone());
                }
                Err(e) => {
                    warn!(hostname = %hostname, error = %e, "Failed to withdraw hostname");
                }
            }
        }

        info!(
            written = report.written,
            changed = report.changed.len(),
            withdrawn = report.withdrawn.len(),
            invalid = report.invalid.len(),
            "Synchronization pass complete"
        );
        Ok(Some(report))
    }

    async fn reset_tracked_services(
        &self,
        ingresses: &[Ingress],
        lb_services: &[Service],
        counts: &HashMap<String, usize>,
    ) {
        if let Err(e) = self.store.untrack_all_services().await {
            warn!(error = %e, "Failed to clear tracked services");
            return;
        }
        for service in services_to_track(ingresses, lb_services, counts) {
            if let Err(e) = self.store.track_service(&service).await {
                warn!(
                    namespace = %service.namespace,
                    name = %service.name,
                    error = %e,
                    "Failed to track service"
                );
            }
        }
    }

    async fn record_resource_versions(
        &self,
        ingresses: &[Ingress],
        services: &[Service],
        endpoints: &[Endpoints],
    ) {
        let metas = ingresses
            .iter()
            .map(|i| &i.metadata)
            .chain(services.iter().map(|s| &s.metadata))
            .chain(endpoints.iter().map(|e| &e.metadata))
            .filter(|m| !m.uid.is_empty() && !m.resource_version.is_empty());

        let results = futures::future::join_all(metas.map(|meta| async move {
            (
                meta,
                self.store
                    .set_resource_version(&meta.uid, &meta.resource_version)
                    .await,
            )
        }))
        .await;

        for (meta, result) in results {
            if let Err(e) = result {
                warn!(uid = %meta.uid, error = %e, "Failed to record resource version");
            }
        }
    }

    /// Decide whether a watched edit warrants a full pass, and run it if so.
    ///
    /// Edits whose resource version is already recorded are dropped. Endpoint
    /// edits only trigger when a tracked service gains its first ready backend
    /// or loses its last one.
    pub async fn on_resource_changed(&self, event: ResourceEvent) -> Result<Option<SyncReport>> {
        let meta = event.metadata();
        if !matches!(event, ResourceEvent::Deleted { .. })
            && !meta.uid.is_empty()
            && !meta.resource_version.is_empty()
        {
            let last = self.store.get_last_resource_version(&meta.uid).await?;
            if last.as_deref() == Some(meta.resource_version.as_str()) {
                debug!(uid = %meta.uid, version = %meta.resource_version, "Resource version unchanged");
                return Ok(None);
            }
        }

        if let ResourceEvent::Endpoints(endpoints) = &event {
            if !self.endpoint_presence_changed(endpoints).await? {
                return Ok(None);
            }
        }

        debug!(kind = ?event.kind(), name = %meta.key(), "Resource change triggers synchronization");
        self.run_full_pass().await
    }

    async fn endpoint_presence_changed(&self, endpoints: &Endpoints) -> Result<bool> {
        let meta = &endpoints.metadata;
        let Some(tracked) = self
            .store
            .get_tracked_service(&meta.namespace, &meta.name)
            .await?
        else {
            return Ok(false);
        };
        let had = tracked.endpoint_count > 0;
        let has = !endpoints.ready_addresses.is_empty();
        Ok(had != has)
    }

    async fn guarded_pass(&self) {
        match AssertUnwindSafe(self.run_full_pass()).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Synchronization pass failed"),
            Err(_) => error!("Synchronization pass panicked"),
        }
    }

    /// Run a pass on every "became leader" edge and every resync interval until cancelled.
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut leadership = self.leadership.watch();
        let mut ticker = interval(self.config.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            let mut watching = true;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Synchronizer shutting down");
                        return;
                    }
                    became = leadership.became_leader(), if watching => {
                        if !became {
                            watching = false;
                            continue;
                        }
                        info!("Became leader, running full synchronization");
                    }
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Synchronizer shutting down mid-pass");
                        return;
                    }
                    () = self.guarded_pass() => {}
                }
            }
        })
    }
}
