//! Behavioral contract shared by both host state backends
//!
//! Every test runs once per backend: the object store over OpenDAL's memory
//! service and the key-value store over the in-memory client.
//!
//! Run with: cargo test --test store_contract

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use gslb_core::{
    config::ObjectStoreConfig,
    models::{HostIp, TrackedService},
    notify::{HostChangeNotifier, LocalNotifier},
    store::{HostStateStore, KeyValueHostState, MemoryKv, ObjectStoreHostState},
};

fn object_store(notifier: Arc<LocalNotifier>) -> Arc<dyn HostStateStore> {
    Arc::new(
        ObjectStoreHostState::from_config(&ObjectStoreConfig::default(), notifier)
            .expect("memory operator"),
    )
}

fn key_value_store(notifier: Arc<LocalNotifier>) -> Arc<dyn HostStateStore> {
    Arc::new(KeyValueHostState::new(Arc::new(MemoryKv::new()), notifier))
}

fn ip(address: &str, priority: i32, weight: u32) -> HostIp {
    HostIp::new(address, priority, weight, "")
}

macro_rules! contract_tests {
    ($($name:ident),* $(,)?) => {
        mod object_store_backend {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(super::object_store).await;
                }
            )*
        }

        mod key_value_backend {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(super::key_value_store).await;
                }
            )*
        }
    };
}

contract_tests!(
    set_host_ips_is_idempotent,
    merged_view_unions_clusters,
    new_batch_supersedes_old,
    empty_batch_withdraws_contribution,
    unknown_hostname_is_absent,
    hostnames_by_cluster,
    first_write_registers_cluster_with_heartbeat,
    heartbeat_round_trip,
    eviction_leaves_no_reference,
    synchronize_caches_repairs_stale_projection,
    tracked_services_reset,
    resource_versions,
    changes_are_announced,
    hostnames_are_case_insensitive,
    repeated_entries_count_once,
);

type Factory = fn(Arc<LocalNotifier>) -> Arc<dyn HostStateStore>;

fn build(factory: Factory) -> Arc<dyn HostStateStore> {
    factory(Arc::new(LocalNotifier::new()))
}

async fn set_host_ips_is_idempotent(factory: Factory) {
    let store = build(factory);
    let batch = vec![ip("10.0.0.1", 0, 50)];

    assert!(store.set_host_ips("app.example.com", "east", &batch).await.unwrap());
    assert!(!store.set_host_ips("app.example.com", "east", &batch).await.unwrap());
}

async fn merged_view_unions_clusters(factory: Factory) {
    let store = build(factory);
    store
        .set_host_ips("app.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();
    store
        .set_host_ips("app.example.com", "west", &[ip("10.0.1.1", 0, 50)])
        .await
        .unwrap();

    let host = store
        .get_host_information("app.example.com")
        .await
        .unwrap()
        .expect("host present");
    let expected: HashSet<HostIp> = [
        HostIp::new("10.0.0.1", 0, 50, "east"),
        HostIp::new("10.0.1.1", 0, 50, "west"),
    ]
    .into_iter()
    .collect();
    assert_eq!(host.host_ips.into_iter().collect::<HashSet<_>>(), expected);

    store
        .remove_cluster_hostname("east", "app.example.com")
        .await
        .unwrap();
    let host = store
        .get_host_information("app.example.com")
        .await
        .unwrap()
        .expect("host still present");
    assert_eq!(host.host_ips, vec![HostIp::new("10.0.1.1", 0, 50, "west")]);
}

async fn new_batch_supersedes_old(factory: Factory) {
    let store = build(factory);
    store
        .set_host_ips(
            "app.example.com",
            "east",
            &[ip("10.0.0.1", 0, 50), ip("10.0.0.2", 0, 50)],
        )
        .await
        .unwrap();

    // Same count, one value differs
    assert!(store
        .set_host_ips(
            "app.example.com",
            "east",
            &[ip("10.0.0.1", 0, 50), ip("10.0.0.2", 0, 10)],
        )
        .await
        .unwrap());

    let host = store
        .get_host_information("app.example.com")
        .await
        .unwrap()
        .expect("host present");
    assert_eq!(host.host_ips.len(), 2);
    assert!(host.host_ips.iter().any(|ip| ip.weight == 10));
}

async fn empty_batch_withdraws_contribution(factory: Factory) {
    let store = build(factory);
    store
        .set_host_ips("app.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();

    assert!(store.set_host_ips("app.example.com", "east", &[]).await.unwrap());
    assert!(store.get_host_information("app.example.com").await.unwrap().is_none());
    assert!(!store
        .get_hostnames(Some("east"))
        .await
        .unwrap()
        .contains("app.example.com"));
    assert!(store.get_hostnames(None).await.unwrap().is_empty());
}

async fn unknown_hostname_is_absent(factory: Factory) {
    let store = build(factory);
    assert!(store.get_host_information("missing.example.com").await.unwrap().is_none());
    assert!(store.get_hostnames(Some("nobody")).await.unwrap().is_empty());
    assert_eq!(store.get_cluster_heartbeat_time("nobody").await.unwrap(), None);
    store
        .remove_cluster_hostname("nobody", "missing.example.com")
        .await
        .unwrap();
}

async fn hostnames_by_cluster(factory: Factory) {
    let store = build(factory);
    store
        .set_host_ips("a.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();
    store
        .set_host_ips("b.example.com", "east", &[ip("10.0.0.2", 0, 50)])
        .await
        .unwrap();
    store
        .set_host_ips("b.example.com", "west", &[ip("10.0.1.2", 0, 50)])
        .await
        .unwrap();

    let east: Vec<String> = store.get_hostnames(Some("east")).await.unwrap().into_iter().collect();
    let west: Vec<String> = store.get_hostnames(Some("west")).await.unwrap().into_iter().collect();
    let all: Vec<String> = store.get_hostnames(None).await.unwrap().into_iter().collect();

    assert_eq!(east, vec!["a.example.com", "b.example.com"]);
    assert_eq!(west, vec!["b.example.com"]);
    assert_eq!(all, vec!["a.example.com", "b.example.com"]);
}

async fn first_write_registers_cluster_with_heartbeat(factory: Factory) {
    let store = build(factory);
    let before = Utc::now() - Duration::seconds(1);
    store
        .set_host_ips("app.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();

    assert!(store.get_cluster_identifiers().await.unwrap().contains("east"));
    let heartbeat = store
        .get_cluster_heartbeat_time("east")
        .await
        .unwrap()
        .expect("heartbeat initialized");
    assert!(heartbeat >= before);
}

async fn heartbeat_round_trip(factory: Factory) {
    let store = build(factory);
    let at = Utc::now() - Duration::seconds(90);
    store.set_cluster_heartbeat("west", at).await.unwrap();

    let stored = store
        .get_cluster_heartbeat_time("west")
        .await
        .unwrap()
        .expect("heartbeat stored");
    assert_eq!(stored.timestamp(), at.timestamp());
    assert!(store.get_cluster_identifiers().await.unwrap().contains("west"));
}

async fn eviction_leaves_no_reference(factory: Factory) {
    let store = build(factory);
    store
        .set_host_ips("app.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();
    store
        .set_host_ips("app.example.com", "west", &[ip("10.0.1.1", 0, 50)])
        .await
        .unwrap();
    store
        .set_host_ips("west-only.example.com", "west", &[ip("10.0.1.2", 0, 50)])
        .await
        .unwrap();

    for hostname in store.get_hostnames(Some("west")).await.unwrap() {
        store.remove_cluster_hostname("west", &hostname).await.unwrap();
    }
    store.remove_cluster("west").await.unwrap();
    store.synchronize_caches().await.unwrap();

    assert!(!store.get_cluster_identifiers().await.unwrap().contains("west"));
    assert!(store.get_hostnames(Some("west")).await.unwrap().is_empty());
    assert!(store.get_host_information("west-only.example.com").await.unwrap().is_none());
    for hostname in store.get_hostnames(None).await.unwrap() {
        let host = store
            .get_host_information(&hostname)
            .await
            .unwrap()
            .expect("projected host");
        assert!(host.host_ips.iter().all(|ip| ip.cluster_identifier != "west"));
    }
}

async fn synchronize_caches_repairs_stale_projection(factory: Factory) {
    let store = build(factory);
    store
        .set_host_ips("app.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();
    store
        .set_host_ips("app.example.com", "west", &[ip("10.0.1.1", 0, 50)])
        .await
        .unwrap();

    // Dropping the registration without withdrawing leaves a stale projection
    store.remove_cluster("west").await.unwrap();
    let repaired = store.synchronize_caches().await.unwrap();
    assert_eq!(repaired, 1);

    let host = store
        .get_host_information("app.example.com")
        .await
        .unwrap()
        .expect("host present");
    assert_eq!(host.host_ips, vec![HostIp::new("10.0.0.1", 0, 50, "east")]);

    // Nothing left to repair
    assert_eq!(store.synchronize_caches().await.unwrap(), 0);
}

async fn tracked_services_reset(factory: Factory) {
    let store = build(factory);
    store
        .track_service(&TrackedService::new("default", "web", 2))
        .await
        .unwrap();
    store
        .track_service(&TrackedService::new("default", "api", 0))
        .await
        .unwrap();

    assert!(store.is_service_monitored("default", "web").await.unwrap());
    assert_eq!(
        store.get_tracked_service("default", "web").await.unwrap(),
        Some(TrackedService::new("default", "web", 2))
    );

    store.untrack_all_services().await.unwrap();
    assert!(!store.is_service_monitored("default", "web").await.unwrap());
    assert!(!store.is_service_monitored("default", "api").await.unwrap());
    assert_eq!(store.get_tracked_service("default", "api").await.unwrap(), None);
}

async fn resource_versions(factory: Factory) {
    let store = build(factory);
    assert_eq!(store.get_last_resource_version("uid-1").await.unwrap(), None);

    store.set_resource_version("uid-1", "100").await.unwrap();
    store.set_resource_version("uid-1", "101").await.unwrap();
    assert_eq!(
        store.get_last_resource_version("uid-1").await.unwrap().as_deref(),
        Some("101")
    );
}

async fn changes_are_announced(factory: Factory) {
    let notifier = Arc::new(LocalNotifier::new());
    let mut rx = notifier.subscribe();
    let store = factory(notifier);

    store
        .set_host_ips("app.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), "app.example.com");

    // Unchanged write stays quiet
    store
        .set_host_ips("app.example.com", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());

    store
        .remove_cluster_hostname("east", "app.example.com")
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), "app.example.com");
}

async fn hostnames_are_case_insensitive(factory: Factory) {
    let store = build(factory);
    store
        .set_host_ips("App.Example.COM.", "east", &[ip("10.0.0.1", 0, 50)])
        .await
        .unwrap();

    assert!(store.get_host_information("app.example.com").await.unwrap().is_some());
    assert!(store.get_host_information("APP.example.com").await.unwrap().is_some());
}

async fn repeated_entries_count_once(factory: Factory) {
    let store = build(factory);
    let a = ip("10.0.0.1", 0, 50);
    let b = ip("10.0.0.2", 0, 50);

    assert!(store
        .set_host_ips("app.example.com", "east", &[a.clone(), a.clone(), b.clone()])
        .await
        .unwrap());
    // Same set, different multiplicities
    assert!(!store
        .set_host_ips("app.example.com", "east", &[a, b.clone(), b])
        .await
        .unwrap());

    let host = store
        .get_host_information("app.example.com")
        .await
        .unwrap()
        .expect("host present");
    let addresses: Vec<&str> = host.host_ips.iter().map(|ip| ip.ip_address.as_str()).collect();
    assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(store.synchronize_caches().await.unwrap(), 0);
}

/// One cluster's batches for many hostnames landing at once, with heartbeats
/// and a second cluster interleaved, must all survive.
async fn concurrent_writers_keep_every_batch(factory: Factory) {
    const HOSTNAMES: usize = 64;
    let store = build(factory);

    for round in 0..5 {
        let mut tasks = Vec::new();
        for i in 0..HOSTNAMES {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let hostname = format!("h{round}-{i}.example.com");
                store
                    .set_host_ips(&hostname, "west", &[ip("10.0.1.1", 0, 50)])
                    .await
                    .unwrap();
                if i % 8 == 0 {
                    store.set_cluster_heartbeat("west", Utc::now()).await.unwrap();
                }
                if i % 4 == 0 {
                    store
                        .set_host_ips(&hostname, "east", &[ip("10.0.0.1", 0, 50)])
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let owned = store.get_hostnames(Some("west")).await.unwrap();
        assert_eq!(owned.len(), HOSTNAMES * (round + 1), "round {round}");
    }

    assert_eq!(store.get_hostnames(None).await.unwrap().len(), HOSTNAMES * 5);
    assert_eq!(store.synchronize_caches().await.unwrap(), 0);

    let host = store
        .get_host_information("h0-0.example.com")
        .await
        .unwrap()
        .expect("host present");
    let clusters: HashSet<&str> = host
        .host_ips
        .iter()
        .map(|ip| ip.cluster_identifier.as_str())
        .collect();
    assert_eq!(clusters, ["east", "west"].into_iter().collect());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn object_store_concurrent_writers_keep_every_batch() {
    concurrent_writers_keep_every_batch(object_store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn key_value_concurrent_writers_keep_every_batch() {
    concurrent_writers_keep_every_batch(key_value_store).await;
}

#[tokio::test]
async fn key_value_blob_round_trip() {
    let kv = Arc::new(MemoryKv::new());
    let store = KeyValueHostState::new(kv.clone(), Arc::new(LocalNotifier::new()));
    let batch = vec![
        HostIp::new("10.0.0.1", 0, 50, "east"),
        HostIp::new("10.0.0.2", 1, 0, "east"),
        HostIp::new("10.0.0.3", 2, 100, "east"),
    ];
    store.set_host_ips("app.example.com", "east", &batch).await.unwrap();

    use gslb_core::store::KeyValueClient;
    let raw = kv
        .get("cluster.east.hosts.app.example.com")
        .await
        .unwrap()
        .expect("blob stored");
    let decoded: Vec<HostIp> = serde_json::from_str(&raw).unwrap();

    let original: HashSet<HostIp> = batch.into_iter().collect();
    assert_eq!(decoded.into_iter().collect::<HashSet<_>>(), original);
}
