//! Resource change notifications fed to the synchronizer by the watch layer.

use crate::discovery::{Endpoints, Ingress, ObjectMeta, Service};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Ingress,
    Service,
    Endpoints,
}

#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Ingress(Ingress),
    Service(Service),
    Endpoints(Endpoints),
    Deleted { kind: ResourceKind, metadata: ObjectMeta },
}

impl ResourceEvent {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Ingress(_) => ResourceKind::Ingress,
            Self::Service(_) => ResourceKind::Service,
            Self::Endpoints(_) => ResourceKind::Endpoints,
            Self::Deleted { kind, .. } => *kind,
        }
    }

    #[must_use]
    pub const fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Ingress(ingress) => &ingress.metadata,
            Self::Service(service) => &service.metadata,
            Self::Endpoints(endpoints) => &endpoints.metadata,
            Self::Deleted { metadata, .. } => metadata,
        }
    }
}
