//! Outbound calls to peer clusters.
//!
//! Every fan-out spawns one task per peer and returns immediately. A failed
//! delivery is logged and dropped; the next full pass or the peer's own
//! timeout eviction repairs it.

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gslb_core::config::PeerConfig;
use gslb_core::models::HostUpdate;

use crate::error::Result;
pub use http::HttpPeerTransport;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Configured peers, excluding this cluster
    fn peers(&self) -> Vec<PeerConfig>;

    /// `POST {peer}/Heartbeat` with an empty body
    async fn post_heartbeat(&self, peer: &PeerConfig) -> Result<()>;

    /// `POST {peer}/Host` carrying one batch owned by this cluster
    async fn post_host(&self, peer: &PeerConfig, update: &HostUpdate) -> Result<()>;
}

/// Send `update` to every peer. The returned handles may be dropped.
pub fn propagate_host(transport: &Arc<dyn PeerTransport>, update: HostUpdate) -> Vec<JoinHandle<()>> {
    let update = Arc::new(update);
    transport
        .peers()
        .into_iter()
        .map(|peer| {
            let transport = transport.clone();
            let update = update.clone();
            tokio::spawn(async move {
                match transport.post_host(&peer, &update).await {
                    Ok(()) => debug!(
                        peer = %peer.cluster_identifier,
                        hostname = %update.hostname,
                        count = update.host_ips.len(),
                        "Propagated host batch"
                    ),
                    Err(e) => warn!(
                        peer = %peer.cluster_identifier,
                        hostname = %update.hostname,
                        error = %e,
                        "Failed to propagate host batch"
                    ),
                }
            })
        })
        .collect()
}

/// Announce this cluster's liveness to every peer. The returned handles may be dropped.
pub fn broadcast_heartbeat(transport: &Arc<dyn PeerTransport>) -> Vec<JoinHandle<()>> {
    transport
        .peers()
        .into_iter()
        .map(|peer| {
            let transport = transport.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.post_heartbeat(&peer).await {
                    warn!(peer = %peer.cluster_identifier, error = %e, "Failed to send heartbeat");
                }
            })
        })
        .collect()
}
