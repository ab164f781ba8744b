//! Object-store host state backend over OpenDAL.
//!
//! Objects:
//! - `clusters/<id>.json`: [`ClusterRecord`] with heartbeat and every owned batch
//! - `hostnames/<hostname>.json`: merged [`Host`] projection
//! - `trackedservices/<ns>.<name>.json`: [`TrackedService`]
//! - `resourceversions/<uid>.json`: [`ResourceVersionMark`]
//!
//! Every mutation is a full read-modify-write of one object. Writes to one
//! cluster record are serialized per cluster identifier, and projection
//! rebuilds per hostname, so concurrent peer updates for different hostnames
//! of the same cluster never overwrite each other. The locks are per process;
//! replicas sharing a bucket are expected to be single-writer per cluster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::{services, ErrorKind, Operator};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::{hostnames_to_reconcile, projection_differs, HostStateStore, KeyedLocks};
use crate::config::{ObjectStoreConfig, ObjectStoreScheme};
use crate::error::Result;
use crate::models::{
    assign_cluster, merge_batches, normalize_hostname, ClusterRecord, Host, HostIp,
    ResourceVersionMark, TrackedService,
};
use crate::notify::HostChangeNotifier;

const CLUSTERS_DIR: &str = "clusters/";
const HOSTNAMES_DIR: &str = "hostnames/";
const TRACKED_SERVICES_DIR: &str = "trackedservices/";
const RESOURCE_VERSIONS_DIR: &str = "resourceversions/";
const OBJECT_SUFFIX: &str = ".json";

fn object_path(dir: &str, name: &str) -> String {
    format!("{dir}{name}{OBJECT_SUFFIX}")
}

pub struct ObjectStoreHostState {
    operator: Operator,
    notifier: Arc<dyn HostChangeNotifier>,
    cluster_locks: KeyedLocks,
    hostname_locks: KeyedLocks,
}

impl ObjectStoreHostState {
    pub fn new(operator: Operator, notifier: Arc<dyn HostChangeNotifier>) -> Self {
        Self {
            operator,
            notifier,
            cluster_locks: KeyedLocks::default(),
            hostname_locks: KeyedLocks::default(),
        }
    }

    /// Build the operator described by `config`
    pub fn from_config(
        config: &ObjectStoreConfig,
        notifier: Arc<dyn HostChangeNotifier>,
    ) -> Result<Self> {
        let operator = match config.scheme {
            ObjectStoreScheme::Memory => {
                Operator::new(services::Memory::default().root(&config.root))?.finish()
            }
            ObjectStoreScheme::S3 => {
                let mut builder = services::S3::default()
                    .root(&config.root)
                    .bucket(&config.bucket)
                    .access_key_id(&config.access_key_id)
                    .secret_access_key(&config.secret_access_key);
                if !config.endpoint.is_empty() {
                    builder = builder.endpoint(&config.endpoint);
                }
                if let Some(region) = &config.region {
                    builder = builder.region(region);
                }
                Operator::new(builder)?.finish()
            }
        };

        info!(
            scheme = ?config.scheme,
            bucket = %config.bucket,
            root = %config.root,
            "Initialized object store"
        );

        Ok(Self::new(operator, notifier))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.operator.read(path).await {
            Ok(buffer) => Ok(Some(serde_json::from_slice(&buffer.to_vec())?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.operator.write(path, body).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.operator.delete(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Object names in `dir` with the `.json` suffix stripped
    async fn list_names(&self, dir: &str) -> Result<BTreeSet<String>> {
        let entries = match self.operator.list(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(entries
            .iter()
            .filter_map(|entry| entry.name().strip_suffix(OBJECT_SUFFIX))
            .map(str::to_string)
            .collect())
    }

    async fn read_cluster(&self, cluster_identifier: &str) -> Result<Option<ClusterRecord>> {
        self.read_json(&object_path(CLUSTERS_DIR, cluster_identifier))
            .await
    }

    /// Load the record, creating it with a fresh heartbeat when first seen
    async fn load_or_create_cluster(&self, cluster_identifier: &str) -> Result<ClusterRecord> {
        match self.read_cluster(cluster_identifier).await? {
            Some(record) => Ok(record),
            None => {
                info!(cluster = %cluster_identifier, "Registered cluster");
                Ok(ClusterRecord::new(cluster_identifier.to_string(), Utc::now()))
            }
        }
    }

    async fn write_cluster(&self, record: &ClusterRecord) -> Result<()> {
        self.write_json(
            &object_path(CLUSTERS_DIR, &record.cluster_identifier),
            record,
        )
        .await
    }

    async fn read_all_clusters(&self) -> Result<Vec<ClusterRecord>> {
        let mut records = Vec::new();
        for cluster_identifier in self.list_names(CLUSTERS_DIR).await? {
            if let Some(record) = self.read_cluster(&cluster_identifier).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn read_projection(&self, hostname: &str) -> Result<Option<Host>> {
        self.read_json(&object_path(HOSTNAMES_DIR, hostname)).await
    }

    /// Rewrite the projection if it no longer matches; returns whether it changed.
    async fn reconcile(&self, hostname: &str, merged: Vec<HostIp>) -> Result<bool> {
        let stored = self.read_projection(hostname).await?;
        if !projection_differs(stored.as_ref(), &merged) {
            return Ok(false);
        }

        let path = object_path(HOSTNAMES_DIR, hostname);
        if merged.is_empty() {
            self.delete(&path).await?;
        } else {
            self.write_json(&path, &Host::new(hostname.to_string(), merged))
                .await?;
        }
        self.notifier.notify(hostname).await;
        Ok(true)
    }

    /// Rebuild one projection from the current cluster records
    async fn refresh_projection(&self, hostname: &str) -> Result<bool> {
        let _guard = self.hostname_locks.lock(hostname).await;
        let mut batches = BTreeMap::new();
        for record in self.read_all_clusters().await? {
            if let Some(ips) = record.hosts.get(hostname) {
                batches.insert(record.cluster_identifier.clone(), ips.clone());
            }
        }
        self.reconcile(hostname, merge_batches(&batches)).await
    }
}

#[async_trait]
impl HostStateStore for ObjectStoreHostState {
    async fn get_host_information(&self, hostname: &str) -> Result<Option<Host>> {
        let hostname = normalize_hostname(hostname);
        Ok(self
            .read_projection(&hostname)
            .await?
            .filter(|host| !host.host_ips.is_empty()))
    }

    async fn get_hostnames(&self, cluster_identifier: Option<&str>) -> Result<BTreeSet<String>> {
        match cluster_identifier {
            Some(id) => Ok(self
                .read_cluster(id)
                .await?
                .map(|record| record.hosts.into_keys().collect())
                .unwrap_or_default()),
            None => self.list_names(HOSTNAMES_DIR).await,
        }
    }

    async fn set_host_ips(
        &self,
        hostname: &str,
        cluster_identifier: &str,
        ips: &[HostIp],
    ) -> Result<bool> {
        let hostname = normalize_hostname(hostname);
        {
            let _guard = self.cluster_locks.lock(cluster_identifier).await;
            let mut record = self.load_or_create_cluster(cluster_identifier).await?;
            if ips.is_empty() {
                record.hosts.remove(&hostname);
            } else {
                record
                    .hosts
                    .insert(hostname.clone(), assign_cluster(ips, cluster_identifier));
            }
            self.write_cluster(&record).await?;
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
        self.list_names(CLUSTERS_DIR).await
    }

    async fn get_cluster_heartbeat_time(
        &self,
        cluster_identifier: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .read_cluster(cluster_identifier)
            .await?
            .and_then(|record| record.last_heartbeat))
    }

    async fn set_cluster_heartbeat(
        &self,
        cluster_identifier: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.cluster_locks.lock(cluster_identifier).await;
        let mut record = self.load_or_create_cluster(cluster_identifier).await?;
        record.last_heartbeat = Some(at);
        self.write_cluster(&record).await
    }

    async fn remove_cluster_hostname(
        &self,
        cluster_identifier: &str,
        hostname: &str,
    ) -> Result<()> {
        let hostname = normalize_hostname(hostname);
        {
            let _guard = self.cluster_locks.lock(cluster_identifier).await;
            if let Some(mut record) = self.read_cluster(cluster_identifier).await? {
                if record.hosts.remove(&hostname).is_some() {
                    self.write_cluster(&record).await?;
                }
            }
        }
        self.refresh_projection(&hostname).await?;
        Ok(())
    }

    async fn remove_cluster(&self, cluster_identifier: &str) -> Result<()> {
        let _guard = self.cluster_locks.lock(cluster_identifier).await;
        self.delete(&object_path(CLUSTERS_DIR, cluster_identifier))
            .await?;
        info!(cluster = %cluster_identifier, "Removed cluster");
        Ok(())
    }

    async fn track_service(&self, service: &TrackedService) -> Result<()> {
        let key = TrackedService::key(&service.namespace, &service.name);
        self.write_json(&object_path(TRACKED_SERVICES_DIR, &key), service)
            .await
    }

    async fn untrack_all_services(&self) -> Result<()> {
        for key in self.list_names(TRACKED_SERVICES_DIR).await? {
            self.delete(&object_path(TRACKED_SERVICES_DIR, &key)).await?;
        }
        Ok(())
    }

    async fn is_service_monitored(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.get_tracked_service(namespace, name).await?.is_some())
    }

    async fn get_tracked_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TrackedService>> {
        let key = TrackedService::key(namespace, name);
        self.read_json(&object_path(TRACKED_SERVICES_DIR, &key))
            .await
    }

    async fn get_last_resource_version(&self, uid: &str) -> Result<Option<String>> {
        Ok(self
            .read_json::<ResourceVersionMark>(&object_path(RESOURCE_VERSIONS_DIR, uid))
            .await?
            .map(|mark| mark.last_seen_version))
    }

    async fn set_resource_version(&self, uid: &str, version: &str) -> Result<()> {
        let mark = ResourceVersionMark {
            uid: uid.to_string(),
            last_seen_version: version.to_string(),
        };
        self.write_json(&object_path(RESOURCE_VERSIONS_DIR, uid), &mark)
            .await
    }

    async fn synchronize_caches(&self) -> Result<usize> {
        let contributed: BTreeSet<String> = self
            .read_all_clusters()
            .await?
            .into_iter()
            .flat_map(|record| {
                record
                    .hosts
                    .into_iter()
                    .filter(|(_, ips)| !ips.is_empty())
                    .map(|(hostname, _)| hostname)
            })
            .collect();

        // Rebuilt from fresh reads under the hostname lock, not from the scan above.
        let projected = self.list_names(HOSTNAMES_DIR).await?;
        let mut repaired = 0;
        for hostname in hostnames_to_reconcile(&projected, &contributed) {
            if self.refresh_projection(&hostname).await? {
                repaired += 1;
            }
        }

        if repaired > 0 {
            info!(repaired, "Repaired host projections");
        }
        Ok(repaired)
    }
}
