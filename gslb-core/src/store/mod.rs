//! Durable host state shared by every cluster.
//!
//! [`HostStateStore`] is the one contract the synchronizer, heartbeat monitor,
//! resolver and peer API program against. Two backends implement it:
//!
//! - [`ObjectStoreHostState`]: one JSON object per cluster, per hostname, per
//!   tracked service and per watched resource, every write a read-modify-write.
//! - [`KeyValueHostState`]: separately keyed blobs over a [`KeyValueClient`]
//!   (Redis in production, [`MemoryKv`] in tests).
//!
//! Both announce every hostname whose merged projection changed through the
//! injected [`HostChangeNotifier`](crate::notify::HostChangeNotifier).

pub mod key_value;
pub mod kv_client;
pub mod object_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;
use crate::models::{ip_sets_differ, Host, HostIp, TrackedService};

pub use self::key_value::KeyValueHostState;
pub use self::kv_client::{KeyValueClient, MemoryKv, RedisKv};
pub use self::object_store::ObjectStoreHostState;

#[async_trait]
pub trait HostStateStore: Send + Sync {
    /// Merged view for one hostname, `None` when no cluster contributes to it
    async fn get_host_information(&self, hostname: &str) -> Result<Option<Host>>;

    /// Hostnames owned by one cluster, or every projected hostname when `None`
    async fn get_hostnames(&self, cluster_identifier: Option<&str>) -> Result<BTreeSet<String>>;

    /// Replace one cluster's batch for `hostname` wholesale.
    ///
    /// Returns whether the merged view differs from before, by count or by value.
    /// Every entry is stamped with `cluster_identifier`. An empty batch removes
    /// the cluster's contribution.
    async fn set_host_ips(
        &self,
        hostname: &str,
        cluster_identifier: &str,
        ips: &[HostIp],
    ) -> Result<bool>;

    async fn get_cluster_identifiers(&self) -> Result<BTreeSet<String>>;

    async fn get_cluster_heartbeat_time(
        &self,
        cluster_identifier: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn set_cluster_heartbeat(&self, cluster_identifier: &str, at: DateTime<Utc>)
        -> Result<()>;

    /// Drop only this cluster's contribution to `hostname`; an emptied hostname is pruned.
    async fn remove_cluster_hostname(&self, cluster_identifier: &str, hostname: &str)
        -> Result<()>;

    /// Forget the cluster's registration and heartbeat.
    ///
    /// Call after its hostnames are removed; projections are repaired by
    /// [`HostStateStore::synchronize_caches`].
    async fn remove_cluster(&self, cluster_identifier: &str) -> Result<()>;

    async fn track_service(&self, service: &TrackedService) -> Result<()>;

    async fn untrack_all_services(&self) -> Result<()>;

    async fn is_service_monitored(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn get_tracked_service(&self, namespace: &str, name: &str)
        -> Result<Option<TrackedService>>;

    async fn get_last_resource_version(&self, uid: &str) -> Result<Option<String>>;

    async fn set_resource_version(&self, uid: &str, version: &str) -> Result<()>;

    /// Recompute every merged projection from the per-cluster batches and
    /// overwrite stale ones. Returns the number of hostnames repaired.
    async fn synchronize_caches(&self) -> Result<usize>;
}

/// Whether a stored projection must be rewritten to match `merged`
pub(crate) fn projection_differs(stored: Option<&Host>, merged: &[HostIp]) -> bool {
    match stored {
        Some(host) => ip_sets_differ(&host.host_ips, merged),
        None => !merged.is_empty(),
    }
}

/// Union of projected hostnames and hostnames some cluster still contributes to
pub(crate) fn hostnames_to_reconcile<'a>(
    projected: impl IntoIterator<Item = &'a String>,
    contributed: impl IntoIterator<Item = &'a String>,
) -> BTreeSet<String> {
    projected.into_iter().chain(contributed).cloned().collect()
}

/// Per-key async locks serializing read-modify-write sequences within this process
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
