//! Key-value host state backend.
//!
//! Layout:
//!
//! | key                              | value                           |
//! |----------------------------------|---------------------------------|
//! | `cluster.<id>.heartbeat`         | RFC 3339 timestamp              |
//! | `cluster.<id>.hosts.<hostname>`  | JSON array of that cluster's batch |
//! | `hostnames.ips.<hostname>`       | JSON array, merged projection   |
//! | `clusteridentifiers`             | comma-delimited cluster ids     |
//! | `trackedservices.<ns>.<name>`    | JSON `TrackedService`           |
//! | `resourceversion.<uid>`          | opaque version string           |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::kv_client::KeyValueClient;
use super::{hostnames_to_reconcile, projection_differs, HostStateStore, KeyedLocks};
use crate::error::Result;
use crate::models::{
    assign_cluster, merge_batches, normalize_hostname, Host, HostIp, TrackedService,
};
use crate::notify::HostChangeNotifier;

const CLUSTER_IDENTIFIERS_KEY: &str = "clusteridentifiers";
const HOSTNAME_IPS_PREFIX: &str = "hostnames.ips.";
const TRACKED_SERVICES_PREFIX: &str = "trackedservices.";
const RESOURCE_VERSION_PREFIX: &str = "resourceversion.";

fn heartbeat_key(cluster_identifier: &str) -> String {
    format!("cluster.{cluster_identifier}.heartbeat")
}

fn cluster_hosts_prefix(cluster_identifier: &str) -> String {
    format!("cluster.{cluster_identifier}.hosts.")
}

fn cluster_host_key(cluster_identifier: &str, hostname: &str) -> String {
    format!("{}{hostname}", cluster_hosts_prefix(cluster_identifier))
}

fn hostname_key(hostname: &str) -> String {
    format!("{HOSTNAME_IPS_PREFIX}{hostname}")
}

fn tracked_service_key(namespace: &str, name: &str) -> String {
    format!(
        "{TRACKED_SERVICES_PREFIX}{}",
        TrackedService::key(namespace, name)
    )
}

fn resource_version_key(uid: &str) -> String {
    format!("{RESOURCE_VERSION_PREFIX}{uid}")
}

fn parse_identifiers(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct KeyValueHostState {
    kv: Arc<dyn KeyValueClient>,
    notifier: Arc<dyn HostChangeNotifier>,
    registry_locks: KeyedLocks,
    hostname_locks: KeyedLocks,
}

impl KeyValueHostState {
    pub fn new(kv: Arc<dyn KeyValueClient>, notifier: Arc<dyn HostChangeNotifier>) -> Self {
        Self {
            kv,
            notifier,
            registry_locks: KeyedLocks::default(),
            hostname_locks: KeyedLocks::default(),
        }
    }

    async fn read_batch(&self, key: &str) -> Result<Option<Vec<HostIp>>> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_batch(&self, key: &str, ips: &[HostIp]) -> Result<()> {
        let raw = serde_json::to_string(ips)?;
        self.kv.set(key, &raw).await
    }

    async fn read_projection(&self, hostname: &str) -> Result<Option<Host>> {
        Ok(self
            .read_batch(&hostname_key(hostname))
            .await?
            .map(|ips| Host::new(hostname.to_string(), ips)))
    }

    /// Register the cluster if new, read-check-append on the shared list.
    ///
    /// Serialized within this process. Writers in different processes racing
    /// on the list can drop one append; the loser re-registers on its next write.
    async fn ensure_cluster(&self, cluster_identifier: &str) -> Result<()> {
        let _guard = self.registry_locks.lock(CLUSTER_IDENTIFIERS_KEY).await;
        let raw = self
            .kv
            .get(CLUSTER_IDENTIFIERS_KEY)
            .await?
            .unwrap_or_default();
        let mut identifiers = parse_identifiers(&raw);
        if identifiers.contains(cluster_identifier) {
            return Ok(());
        }

        identifiers.insert(cluster_identifier.to_string());
        let joined = identifiers.into_iter().collect::<Vec<_>>().join(",");
        self.kv.set(CLUSTER_IDENTIFIERS_KEY, &joined).await?;

        if self.kv.get(&heartbeat_key(cluster_identifier)).await?.is_none() {
            self.kv
                .set(&heartbeat_key(cluster_identifier), &Utc::now().to_rfc3339())
                .await?;
        }

        info!(cluster = %cluster_identifier, "Registered cluster");
        Ok(())
    }

    /// Every cluster's batch for one hostname, keyed by cluster
    async fn collect_batches(&self, hostname: &str) -> Result<BTreeMap<String, Vec<HostIp>>> {
        let mut batches = BTreeMap::new();
        for cluster_identifier in self.get_cluster_identifiers().await? {
            if let Some(ips) = self
                .read_batch(&cluster_host_key(&cluster_identifier, hostname))
                .await?
            {
                if !ips.is_empty() {
                    batches.insert(cluster_identifier, ips);
                }
            }
        }
        Ok(batches)
    }

    /// Rewrite the merged blob if it no longer matches; returns whether it changed.
    async fn reconcile(&self, hostname: &str, merged: &[HostIp]) -> Result<bool> {
        let stored = self.read_projection(hostname).await?;
        if !projection_differs(stored.as_ref(), merged) {
            return Ok(false);
        }

        if merged.is_empty() {
            self.kv.delete(&hostname_key(hostname)).await?;
        } else {
            self.write_batch(&hostname_key(hostname), merged).await?;
        }
        self.notifier.notify(hostname).await;
        Ok(true)
    }

    async fn refresh_projection(&self, hostname: &str) -> Result<bool> {
        let _guard = self.hostname_locks.lock(hostname).await;
        let batches = self.collect_batches(hostname).await?;
        self.reconcile(hostname, &merge_batches(&batches)).await
    }
}

#[async_trait]
impl HostStateStore for KeyValueHostState {
    async fn get_host_information(&self, hostname: &str) -> Result<Option<Host>> {
        let hostname = normalize_hostname(hostname);
        Ok(self
            .read_projection(&hostname)
            .await?
            .filter(|host| !host.host_ips.is_empty()))
    }

    async fn get_hostnames(&self, cluster_identifier: Option<&str>) -> Result<BTreeSet<String>> {
        let prefix = match cluster_identifier {
            Some(id) => cluster_hosts_prefix(id),
            None => HOSTNAME_IPS_PREFIX.to_string(),
        };
        Ok(self
            .kv
            .keys_with_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn set_host_ips(
        &self,
        hostname: &str,
        cluster_identifier: &str,
        ips: &[HostIp],
    ) -> Result<bool> {
        let hostname = normalize_hostname(hostname);
        self.ensure_cluster(cluster_identifier).await?;

        let key = cluster_host_key(cluster_identifier, &hostname);
        if ips.is_empty() {
            self.kv.delete(&key).await?;
        } else {
            self.write_batch(&key, &assign_cluster(ips, cluster_identifier))
                .await?;
        }

        let changed = self.refresh_projection(&hostname).await?;
        debug!(
            hostname = %hostname,
            cluster = %cluster_identifier,
            count = ips.len(),
            changed,
            "Stored host batch"
        );
        Ok(changed)
    }

    async fn get_cluster_identifiers(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .kv
            .get(CLUSTER_IDENTIFIERS_KEY)
            .await?
            .map(|raw| parse_identifiers(&raw))
            .unwrap_or_default())
    }

    async fn get_cluster_heartbeat_time(
        &self,
        cluster_identifier: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.kv.get(&heartbeat_key(cluster_identifier)).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                // Treated as absent, which the monitor reads as expired.
                warn!(cluster = %cluster_identifier, error = %e, "Unparseable heartbeat");
                Ok(None)
            }
        }
    }

    async fn set_cluster_heartbeat(
        &self,
        cluster_identifier: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_cluster(cluster_identifier).await?;
        self.kv
            .set(&heartbeat_key(cluster_identifier), &at.to_rfc3339())
            .await
    }

    async fn remove_cluster_hostname(
        &self,
        cluster_identifier: &str,
        hostname: &str,
    ) -> Result<()> {
        let hostname = normalize_hostname(hostname);
        self.kv
            .delete(&cluster_host_key(cluster_identifier, &hostname))
            .await?;
        self.refresh_projection(&hostname).await?;
        Ok(())
    }

    async fn remove_cluster(&self, cluster_identifier: &str) -> Result<()> {
        for key in self
            .kv
            .keys_with_prefix(&cluster_hosts_prefix(cluster_identifier))
            .await?
        {
            self.kv.delete(&key).await?;
        }
        self.kv.delete(&heartbeat_key(cluster_identifier)).await?;

        let _guard = self.registry_locks.lock(CLUSTER_IDENTIFIERS_KEY).await;
        let mut identifiers = self.get_cluster_identifiers().await?;
        if identifiers.remove(cluster_identifier) {
            let joined = identifiers.into_iter().collect::<Vec<_>>().join(",");
            self.kv.set(CLUSTER_IDENTIFIERS_KEY, &joined).await?;
        }

        info!(cluster = %cluster_identifier, "Removed cluster");
        Ok(())
    }

    async fn track_service(&self, service: &TrackedService) -> Result<()> {
        let raw = serde_json::to_string(service)?;
        self.kv
            .set(&tracked_service_key(&service.namespace, &service.name), &raw)
            .await
    }

    async fn untrack_all_services(&self) -> Result<()> {
        for key in self.kv.keys_with_prefix(TRACKED_SERVICES_PREFIX).await? {
            self.kv.delete(&key).await?;
        }
        Ok(())
    }

    async fn is_service_monitored(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self
            .kv
            .get(&tracked_service_key(namespace, name))
            .await?
            .is_some())
    }

    async fn get_tracked_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TrackedService>> {
        match self.kv.get(&tracked_service_key(namespace, name)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_last_resource_version(&self, uid: &str) -> Result<Option<String>> {
        self.kv.get(&resource_version_key(uid)).await
    }

    async fn set_resource_version(&self, uid: &str, version: &str) -> Result<()> {
        self.kv.set(&resource_version_key(uid), version).await
    }

    async fn synchronize_caches(&self) -> Result<usize> {
        let mut contributions: BTreeMap<String, BTreeMap<String, Vec<HostIp>>> = BTreeMap::new();
        for cluster_identifier in self.get_cluster_identifiers().await? {
            let prefix = cluster_hosts_prefix(&cluster_identifier);
            for key in self.kv.keys_with_prefix(&prefix).await? {
                let Some(hostname) = key.strip_prefix(&prefix) else {
                    continue;
                };
                if let Some(ips) = self.read_batch(&key).await? {
                    if !ips.is_empty() {
                        contributions
                            .entry(hostname.to_string())
                            .or_default()
                            .insert(cluster_identifier.clone(), ips);
                    }
                }
            }
        }

        let projected = self.get_hostnames(None).await?;
        let mut repaired = 0;
        for hostname in hostnames_to_reconcile(&projected, contributions.keys()) {
            let merged = contributions
                .get(&hostname)
                .map(merge_batches)
                .unwrap_or_default();
            if self.reconcile(&hostname, &merged).await? {
                repaired += 1;
            }
        }

        if repaired > 0 {
            info!(repaired, "Repaired host projections");
        }
        Ok(repaired)
    }
}
