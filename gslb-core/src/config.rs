use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub dns: DnsConfig,
    pub store: StoreConfig,
    pub redis: RedisConfig,
    pub cluster: ClusterConfig,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub host: String,
    pub port: u16,
    /// TTL stamped on every answer record, in seconds
    pub ttl: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5353,
            ttl: 5,
        }
    }
}

/// Which host-state backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    ObjectStore,
    #[default]
    KeyValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub object_store: ObjectStoreConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreScheme {
    #[default]
    Memory,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub scheme: ObjectStoreScheme,
    pub endpoint: String,
    pub bucket: String,
    pub region: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Path prefix inside the bucket
    pub root: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            scheme: ObjectStoreScheme::Memory,
            endpoint: String::new(),
            bucket: String::new(),
            region: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            root: "/gslb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    /// Pub/sub channel carrying bare hostnames on change
    pub channel: String,
    pub operation_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "gslb:".to_string(),
            channel: "hostnames.changed".to_string(),
            operation_timeout_secs: 5,
        }
    }
}

/// A remote cluster this one replicates to and accepts updates from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub cluster_identifier: String,
    pub url: String,
    /// Key the peer presents when calling us
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub identifier: String,
    /// Key presented to peers on outbound calls
    pub api_key: String,
    /// Static leadership signal for deployments without an external election
    pub leader: bool,
    pub peers: Vec<PeerConfig>,
    pub heartbeat_set_interval_secs: u64,
    pub heartbeat_check_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub cache_repair_interval_secs: u64,
    pub resync_interval_secs: u64,
    pub sync_wait_timeout_secs: u64,
    pub peer_request_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            api_key: String::new(),
            leader: true,
            peers: Vec::new(),
            heartbeat_set_interval_secs: 5,
            heartbeat_check_interval_secs: 10,
            heartbeat_timeout_secs: 30,
            cache_repair_interval_secs: 300,
            resync_interval_secs: 60,
            sync_wait_timeout_secs: 5,
            peer_request_timeout_secs: 10,
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub const fn heartbeat_set_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_set_interval_secs)
    }

    #[must_use]
    pub const fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_check_interval_secs)
    }

    #[must_use]
    pub const fn cache_repair_interval(&self) -> Duration {
        Duration::from_secs(self.cache_repair_interval_secs)
    }

    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    #[must_use]
    pub const fn sync_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_wait_timeout_secs)
    }

    #[must_use]
    pub const fn peer_request_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// JSON snapshot of ingresses, services and endpoints, re-read every pass
    pub snapshot_path: Option<String>,
    pub priority_annotation: String,
    pub weight_annotation: String,
    pub hostname_annotation: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            priority_annotation: "gslb.io/priority".to_string(),
            weight_annotation: "gslb.io/weight".to_string(),
            hostname_annotation: "gslb.io/hostname".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // GSLB_CLUSTER__IDENTIFIER, GSLB_REDIS__URL, ...
        builder = builder.add_source(
            Environment::with_prefix("GSLB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations that would make the process useless.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cluster.identifier.trim().is_empty() {
            errors.push("cluster.identifier must be set".to_string());
        }
        if self.cluster.heartbeat_timeout_secs <= self.cluster.heartbeat_set_interval_secs {
            errors.push(format!(
                "cluster.heartbeat_timeout_secs ({}) must exceed cluster.heartbeat_set_interval_secs ({})",
                self.cluster.heartbeat_timeout_secs, self.cluster.heartbeat_set_interval_secs
            ));
        }
        for (name, secs) in [
            ("heartbeat_set_interval_secs", self.cluster.heartbeat_set_interval_secs),
            ("heartbeat_check_interval_secs", self.cluster.heartbeat_check_interval_secs),
            ("cache_repair_interval_secs", self.cluster.cache_repair_interval_secs),
            ("resync_interval_secs", self.cluster.resync_interval_secs),
        ] {
            if secs == 0 {
                errors.push(format!("cluster.{name} must be greater than zero"));
            }
        }
        for peer in &self.cluster.peers {
            if peer.cluster_identifier == self.cluster.identifier {
                errors.push(format!(
                    "peer {} has the same identifier as this cluster",
                    peer.url
                ));
            }
            if !peer.url.starts_with("http://") && !peer.url.starts_with("https://") {
                errors.push(format!("peer {} url must be http(s): {}", peer.cluster_identifier, peer.url));
            }
            if peer.api_key.is_empty() {
                errors.push(format!("peer {} has no api_key", peer.cluster_identifier));
            }
        }
        if !self.cluster.peers.is_empty() && self.cluster.api_key.is_empty() {
            errors.push("cluster.api_key must be set when peers are configured".to_string());
        }
        match self.store.backend {
            StoreBackend::KeyValue if self.redis.url.is_empty() => {
                errors.push("redis.url must be set for the key_value store backend".to_string());
            }
            StoreBackend::ObjectStore
                if self.store.object_store.scheme == ObjectStoreScheme::S3
                    && self.store.object_store.bucket.is_empty() =>
            {
                errors.push("store.object_store.bucket must be set for s3".to_string());
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Get DNS listen address
    #[must_use]
    pub fn dns_address(&self) -> String {
        format!("{}:{}", self.dns.host, self.dns.port)
    }
}
