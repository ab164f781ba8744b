pub mod cluster;
pub mod host;

pub use cluster::{heartbeat_expired, ClusterRecord, ResourceVersionMark, TrackedService};
pub use host::{
    assign_cluster, ip_sets_differ, is_valid_hostname, merge_batches, normalize_hostname, Host,
    HostIp, HostUpdate, PeerHostIp, DEFAULT_PRIORITY, DEFAULT_WEIGHT,
};
