//! Hostname → candidate IP model shared by the store, synchronizer and resolver.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Default priority when an exposing object carries no priority annotation
pub const DEFAULT_PRIORITY: i32 = 0;

/// Default weight when an exposing object carries no weight annotation
pub const DEFAULT_WEIGHT: u32 = 50;

/// One candidate address offered by one cluster for one hostname.
///
/// Lower `priority` is preferred. A `weight` of zero marks the address as
/// failover-only within its priority group. Equality covers all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostIp {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    pub priority: i32,
    pub weight: u32,
    pub cluster_identifier: String,
}

impl HostIp {
    #[must_use]
    pub fn new(
        ip_address: impl Into<String>,
        priority: i32,
        weight: u32,
        cluster_identifier: impl Into<String>,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            priority,
            weight,
            cluster_identifier: cluster_identifier.into(),
        }
    }
}

/// Merged view of every cluster's latest batch for one hostname
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Host {
    pub hostname: String,
    #[serde(rename = "HostIPs")]
    pub host_ips: Vec<HostIp>,
}

impl Host {
    #[must_use]
    pub const fn new(hostname: String, host_ips: Vec<HostIp>) -> Self {
        Self { hostname, host_ips }
    }
}

/// Returns true when two batches differ by count or by value, ignoring order.
#[must_use]
pub fn ip_sets_differ(before: &[HostIp], after: &[HostIp]) -> bool {
    if before.len() != after.len() {
        return true;
    }
    let before: HashSet<&HostIp> = before.iter().collect();
    let after: HashSet<&HostIp> = after.iter().collect();
    before != after
}

/// Union of per-cluster batches into one merged list.
///
/// Iteration over a `BTreeMap` keeps the merged order stable across backends.
#[must_use]
pub fn merge_batches(batches: &BTreeMap<String, Vec<HostIp>>) -> Vec<HostIp> {
    batches.values().flatten().cloned().collect()
}

/// Stamp every address with the owning cluster, replacing whatever the caller sent.
///
/// A batch is a set: repeated entries are dropped, keeping first-seen order.
#[must_use]
pub fn assign_cluster(ips: &[HostIp], cluster_identifier: &str) -> Vec<HostIp> {
    let mut seen = HashSet::with_capacity(ips.len());
    ips.iter()
        .map(|ip| HostIp {
            cluster_identifier: cluster_identifier.to_string(),
            ..ip.clone()
        })
        .filter(|ip| seen.insert(ip.clone()))
        .collect()
}

/// Canonical form used for every hostname key: lowercase, no trailing dot
#[must_use]
pub fn normalize_hostname(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_ascii_lowercase()
}

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Whether a normalized hostname is a DNS name usable as a storage key.
///
/// Labels are 1 to 63 ASCII letters, digits, `-` or `_` and never start or
/// end with `-`. The leftmost label may be a lone `*`.
#[must_use]
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    hostname.split('.').enumerate().all(|(index, label)| {
        if index == 0 && label == "*" {
            return true;
        }
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}

/// Peer-facing address entry; the owning cluster is implied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerHostIp {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    pub priority: i32,
    pub weight: u32,
}

/// Body of `POST {peer}/Host`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostUpdate {
    pub hostname: String,
    #[serde(rename = "HostIPs", default)]
    pub host_ips: Vec<PeerHostIp>,
}

impl HostUpdate {
    /// Build the wire form of one cluster's batch
    #[must_use]
    pub fn from_batch(hostname: &str, ips: &[HostIp]) -> Self {
        Self {
            hostname: hostname.to_string(),
            host_ips: ips
                .iter()
                .map(|ip| PeerHostIp {
                    ip_address: ip.ip_address.clone(),
                    priority: ip.priority,
                    weight: ip.weight,
                })
                .collect(),
        }
    }

    /// Convert back into a batch owned by `cluster_identifier`
    #[must_use]
    pub fn into_batch(self, cluster_identifier: &str) -> Vec<HostIp> {
        self.host_ips
            .into_iter()
            .map(|ip| HostIp::new(ip.ip_address, ip.priority, ip.weight, cluster_identifier))
            .collect()
    }
}
