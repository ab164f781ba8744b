//! Local cluster discovery
//!
//! The synchronizer reads ingresses, services and endpoints through
//! [`ClusterResources`]. The orchestrator client itself lives outside this
//! crate; [`StaticResources`] and [`SnapshotFileResources`] stand in for it.

pub mod resources;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;

use crate::error::{Error, Result};
pub use resources::{
    Candidate, Endpoints, ExposureKind, Ingress, IngressRule, ObjectMeta, ResourceSnapshot,
    Service, ServiceType,
};

#[async_trait]
pub trait ClusterResources: Send + Sync {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>>;
    async fn list_services(&self) -> Result<Vec<Service>>;
    async fn list_endpoints(&self) -> Result<Vec<Endpoints>>;
}

/// In-memory snapshot, swapped wholesale
#[derive(Debug, Default)]
pub struct StaticResources {
    snapshot: RwLock<ResourceSnapshot>,
}

impl StaticResources {
    #[must_use]
    pub fn new(snapshot: ResourceSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn replace(&self, snapshot: ResourceSnapshot) {
        *self.snapshot.write() = snapshot;
    }
}

#[async_trait]
impl ClusterResources for StaticResources {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>> {
        Ok(self.snapshot.read().ingresses.clone())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.snapshot.read().services.clone())
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoints>> {
        Ok(self.snapshot.read().endpoints.clone())
    }
}

/// JSON snapshot on disk, re-read on every call so edits apply on the next pass
#[derive(Debug, Clone)]
pub struct SnapshotFileResources {
    path: PathBuf,
}

impl SnapshotFileResources {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<ResourceSnapshot> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Discovery(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Discovery(format!("Invalid snapshot {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl ClusterResources for SnapshotFileResources {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>> {
        Ok(self.load().await?.ingresses)
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.load().await?.services)
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoints>> {
        Ok(self.load().await?.endpoints)
    }
}
