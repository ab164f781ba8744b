mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use gslb_cluster::{
    ClusterResources, HeartbeatConfig, HeartbeatMonitor, HttpPeerTransport, SnapshotFileResources,
    StaticResources, Synchronizer, SynchronizerConfig,
};
use gslb_core::config::StoreBackend;
use gslb_core::notify::{LocalNotifier, RedisNotifier};
use gslb_core::random::ThreadRandom;
use gslb_core::store::{KeyValueHostState, ObjectStoreHostState, RedisKv};
use gslb_core::{logging, Config, HealthState, HostChangeNotifier, HostStateStore, LeadershipCell};
use gslb_dns::Resolver;

use server::{Components, GslbServer};

#[derive(Debug, Parser)]
#[command(name = "gslb", version, about = "Global server load balancing control plane")]
struct Args {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long, env = "GSLB_CONFIG_PATH")]
    config: Option<String>,
}

/// Unique id for this process, used only to tell replicas apart in logs
fn generate_instance_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{hostname}-{}", nanoid::nanoid!(6))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(
        instance = %generate_instance_id(),
        cluster = %config.cluster.identifier,
        peers = config.cluster.peers.len(),
        backend = ?config.store.backend,
        "GSLB starting..."
    );

    // 4. Store and change notifications
    let (store, notifier, redis_notifier) = build_store(&config).await?;

    // 5. Cluster-side components
    let leadership = Arc::new(LeadershipCell::new(config.cluster.leader));
    let peers = Arc::new(HttpPeerTransport::from_config(&config.cluster)?);
    let resources: Arc<dyn ClusterResources> = match &config.discovery.snapshot_path {
        Some(path) => {
            info!(path = %path, "Discovering from snapshot file");
            Arc::new(SnapshotFileResources::new(path))
        }
        None => {
            info!("No discovery source configured, local cluster exposes nothing");
            Arc::new(StaticResources::default())
        }
    };

    let synchronizer = Arc::new(Synchronizer::new(
        store.clone(),
        resources,
        peers.clone(),
        leadership.clone(),
        SynchronizerConfig::from_config(&config),
    ));
    let monitor = Arc::new(HeartbeatMonitor::new(
        store.clone(),
        peers,
        leadership,
        HeartbeatConfig::from_config(&config),
    ));

    // 6. Resolver
    let resolver = Arc::new(Resolver::new(
        store.clone(),
        Arc::new(ThreadRandom),
        config.dns.ttl,
    ));

    let components = Components {
        store,
        notifier,
        redis_notifier,
        synchronizer,
        monitor,
        resolver,
        health: Arc::new(HealthState::new()),
    };

    GslbServer::new(config, components).start().await
}

async fn build_store(
    config: &Config,
) -> Result<(
    Arc<dyn HostStateStore>,
    Arc<dyn HostChangeNotifier>,
    Option<Arc<RedisNotifier>>,
)> {
    match config.store.backend {
        StoreBackend::KeyValue => {
            let kv = RedisKv::connect(&config.redis).await?;
            let redis_notifier = Arc::new(
                RedisNotifier::connect(
                    &config.redis.url,
                    config.redis.channel.clone(),
                    Duration::from_secs(config.redis.operation_timeout_secs),
                )
                .await?,
            );
            let notifier: Arc<dyn HostChangeNotifier> = redis_notifier.clone();
            let store: Arc<dyn HostStateStore> =
                Arc::new(KeyValueHostState::new(Arc::new(kv), notifier.clone()));
            info!(channel = %config.redis.channel, "Using key-value store");
            Ok((store, notifier, Some(redis_notifier)))
        }
        StoreBackend::ObjectStore => {
            let notifier: Arc<dyn HostChangeNotifier> = Arc::new(LocalNotifier::new());
            let store: Arc<dyn HostStateStore> = Arc::new(ObjectStoreHostState::from_config(
                &config.store.object_store,
                notifier.clone(),
            )?);
            info!(scheme = ?config.store.object_store.scheme, "Using object store");
            Ok((store, notifier, None))
        }
    }
}
