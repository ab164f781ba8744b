//! Local cluster resources and the hostname candidates derived from them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use gslb_core::models::{normalize_hostname, TrackedService};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub resource_version: String,
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    #[must_use]
    pub fn key(&self) -> String {
        TrackedService::key(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressRule {
    pub host: String,
    /// Backend service names, same namespace as the ingress
    pub backend_services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ingress {
    pub metadata: ObjectMeta,
    pub rules: Vec<IngressRule>,
    pub load_balancer_ips: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub metadata: ObjectMeta,
    pub service_type: ServiceType,
    pub load_balancer_ips: Vec<String>,
}

/// Ready backends of the service with the same namespace and name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub metadata: ObjectMeta,
    pub ready_addresses: Vec<String>,
}

/// Everything discovery returns in one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSnapshot {
    pub ingresses: Vec<Ingress>,
    pub services: Vec<Service>,
    pub endpoints: Vec<Endpoints>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExposureKind {
    Ingress,
    Service,
}

/// One object claiming one hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub hostname: String,
    pub kind: ExposureKind,
    pub namespace: String,
    pub name: String,
    pub ips: Vec<String>,
    pub annotations: BTreeMap<String, String>,
}

impl Candidate {
    fn from_meta(hostname: &str, kind: ExposureKind, meta: &ObjectMeta, ips: &[String]) -> Self {
        Self {
            hostname: normalize_hostname(hostname),
            kind,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            ips: ips.to_vec(),
            annotations: meta.annotations.clone(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> String {
        TrackedService::key(&self.namespace, &self.name)
    }
}

/// Ready endpoint count per `namespace.name`
#[must_use]
pub fn endpoint_counts(endpoints: &[Endpoints]) -> HashMap<String, usize> {
    endpoints
        .iter()
        .map(|ep| (ep.metadata.key(), ep.ready_addresses.len()))
        .collect()
}

fn has_ready(counts: &HashMap<String, usize>, namespace: &str, name: &str) -> bool {
    counts
        .get(&TrackedService::key(namespace, name))
        .is_some_and(|count| *count > 0)
}

/// Rules whose ingress has an address and at least one ready backend
#[must_use]
pub fn ingress_candidates(
    ingresses: &[Ingress],
    counts: &HashMap<String, usize>,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for ingress in ingresses {
        if ingress.load_balancer_ips.is_empty() {
            continue;
        }
        let namespace = &ingress.metadata.namespace;
        for rule in &ingress.rules {
            if rule.host.trim().is_empty() {
                continue;
            }
            if rule
                .backend_services
                .iter()
                .any(|svc| has_ready(counts, namespace, svc))
            {
                candidates.push(Candidate::from_meta(
                    &rule.host,
                    ExposureKind::Ingress,
                    &ingress.metadata,
                    &ingress.load_balancer_ips,
                ));
            }
        }
    }
    candidates
}

#[must_use]
pub fn load_balancer_services(services: &[Service]) -> Vec<Service> {
    services
        .iter()
        .filter(|svc| svc.service_type == ServiceType::LoadBalancer)
        .cloned()
        .collect()
}

/// Hostnames claimed through `hostname_annotation` by ready load-balancer services
#[must_use]
pub fn service_candidates(
    lb_services: &[Service],
    counts: &HashMap<String, usize>,
    hostname_annotation: &str,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for svc in lb_services {
        if svc.load_balancer_ips.is_empty()
            || !has_ready(counts, &svc.metadata.namespace, &svc.metadata.name)
        {
            continue;
        }
        let Some(hostnames) = svc.metadata.annotations.get(hostname_annotation) else {
            continue;
        };
        for hostname in hostnames.split(',').filter(|h| !h.trim().is_empty()) {
            candidates.push(Candidate::from_meta(
                hostname,
                ExposureKind::Service,
                &svc.metadata,
                &svc.load_balancer_ips,
            ));
        }
    }
    candidates
}

/// Services referenced by any ingress plus every load-balancer service
#[must_use]
pub fn services_to_track(
    ingresses: &[Ingress],
    lb_services: &[Service],
    counts: &HashMap<String, usize>,
) -> Vec<TrackedService> {
    let mut tracked = BTreeMap::new();
    for ingress in ingresses {
        let namespace = &ingress.metadata.namespace;
        for name in ingress.rules.iter().flat_map(|r| &r.backend_services) {
            let key = TrackedService::key(namespace, name);
            let count = counts.get(&key).copied().unwrap_or(0);
            tracked.insert(key, TrackedService::new(namespace.clone(), name.clone(), count));
        }
    }
    for svc in lb_services {
        let key = svc.metadata.key();
        let count = counts.get(&key).copied().unwrap_or(0);
        tracked.insert(
            key,
            TrackedService::new(svc.metadata.namespace.clone(), svc.metadata.name.clone(), count),
        );
    }
    tracked.into_values().collect()
}
