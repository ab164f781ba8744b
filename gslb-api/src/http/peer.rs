//! Inbound calls from peer clusters.
//!
//! Every caller is authenticated by API key and may only write its own
//! cluster's batches; the owning cluster comes from the key, never the body.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, info};

use gslb_core::models::{is_valid_hostname, normalize_hostname, HostUpdate};

use super::middleware::CallerCluster;
use super::{AppError, AppResult, AppState};

pub fn create_peer_router() -> Router<AppState> {
    Router::new()
        .route("/Heartbeat", post(receive_heartbeat))
        .route("/Host", post(receive_host))
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostUpdateResponse {
    pub changed: bool,
}

pub async fn receive_heartbeat(
    State(state): State<AppState>,
    CallerCluster(cluster): CallerCluster,
) -> AppResult<StatusCode> {
    state.store.set_cluster_heartbeat(&cluster, Utc::now()).await?;
    debug!(cluster = %cluster, "Heartbeat received");
    Ok(StatusCode::OK)
}

pub async fn receive_host(
    State(state): State<AppState>,
    CallerCluster(cluster): CallerCluster,
    body: Result<Json<HostUpdate>, JsonRejection>,
) -> AppResult<Json<HostUpdateResponse>> {
    let Json(update) = body?;
    validate_update(&update)?;

    let hostname = normalize_hostname(&update.hostname);
    let batch = update.into_batch(&cluster);
    let changed = state.store.set_host_ips(&hostname, &cluster, &batch).await?;

    info!(
        cluster = %cluster,
        hostname = %hostname,
        ips = batch.len(),
        changed,
        "Peer host update applied"
    );
    Ok(Json(HostUpdateResponse { changed }))
}

fn validate_update(update: &HostUpdate) -> AppResult<()> {
    let hostname = normalize_hostname(&update.hostname);
    if hostname.is_empty() {
        return Err(AppError::bad_request("Hostname must not be empty"));
    }
    if !is_valid_hostname(&hostname) {
        return Err(AppError::bad_request(format!(
            "Invalid Hostname: {}",
            update.hostname
        )));
    }
    if let Some(bad) = update
        .host_ips
        .iter()
        .find(|ip| ip.ip_address.parse::<IpAddr>().is_err())
    {
        return Err(AppError::bad_request(format!(
            "Invalid IPAddress: {}",
            bad.ip_address
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gslb_core::models::PeerHostIp;

    fn update(hostname: &str, ips: &[&str]) -> HostUpdate {
        HostUpdate {
            hostname: hostname.to_string(),
            host_ips: ips
                .iter()
                .map(|ip| PeerHostIp {
                    ip_address: (*ip).to_string(),
                    priority: 0,
                    weight: 50,
                })
                .collect(),
        }
    }

    #[test]
    fn test_validate_update() {
        assert!(validate_update(&update("app.example.com", &["10.0.0.1", "2001:db8::1"])).is_ok());
        assert!(validate_update(&update("app.example.com", &[])).is_ok());
        assert!(validate_update(&update(" . ", &["10.0.0.1"])).is_err());
        assert!(validate_update(&update("app.example.com", &["10.0.0"])).is_err());
    }

    #[test]
    fn test_validate_update_rejects_non_dns_names() {
        for hostname in ["a/b", "../clusters/east", "app example.com", "a..b.example.com"] {
            assert!(
                validate_update(&update(hostname, &["10.0.0.1"])).is_err(),
                "{hostname} accepted"
            );
        }
        assert!(validate_update(&update("App.Example.COM.", &["10.0.0.1"])).is_ok());
    }
}
