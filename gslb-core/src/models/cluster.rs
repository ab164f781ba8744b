use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::host::HostIp;

/// One federated cluster: its liveness and every hostname batch it owns.
///
/// This is the durable shape used by the object-store backend; the key-value
/// backend spreads the same information across separate keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub cluster_identifier: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hosts: BTreeMap<String, Vec<HostIp>>,
}

impl ClusterRecord {
    /// A cluster seen for the first time starts its timeout window now
    #[must_use]
    pub fn new(cluster_identifier: String, now: DateTime<Utc>) -> Self {
        Self {
            cluster_identifier,
            last_heartbeat: Some(now),
            hosts: BTreeMap::new(),
        }
    }

    /// Whether the last heartbeat is older than `timeout_secs` at `now`.
    ///
    /// A cluster with no recorded heartbeat counts as expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        heartbeat_expired(self.last_heartbeat, now, timeout_secs)
    }
}

/// Shared expiry rule for both backends
#[must_use]
pub fn heartbeat_expired(
    last_heartbeat: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timeout_secs: i64,
) -> bool {
    last_heartbeat.is_none_or(|at| now.signed_duration_since(at).num_seconds() > timeout_secs)
}

/// A service whose endpoint transitions are relevant to resync decisions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedService {
    pub namespace: String,
    pub name: String,
    pub endpoint_count: usize,
}

impl TrackedService {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, endpoint_count: usize) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            endpoint_count,
        }
    }

    /// Storage key fragment: `<namespace>.<name>`
    #[must_use]
    pub fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}.{name}")
    }
}

/// Last resource version seen for a watched object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersionMark {
    pub uid: String,
    pub last_seen_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_heartbeat_expiry() {
        let now = Utc::now();
        let record = ClusterRecord::new("east".to_string(), now - Duration::seconds(60));

        assert!(record.is_expired(now, 30));
        assert!(!record.is_expired(now, 90));
    }

    #[test]
    fn test_missing_heartbeat_is_expired() {
        assert!(heartbeat_expired(None, Utc::now(), 30));
    }

    #[test]
    fn test_tracked_service_key() {
        assert_eq!(TrackedService::key("default", "web"), "default.web");
    }
}
