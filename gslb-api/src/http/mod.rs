// HTTP surface: peer endpoints plus probes

pub mod error;
pub mod health;
pub mod middleware;
pub mod peer;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use gslb_core::{HealthState, HostStateStore};

pub use error::{AppError, AppResult, ErrorResponse};
pub use middleware::{CallerCluster, PeerAuthenticator};
pub use peer::HostUpdateResponse;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HostStateStore>,
    pub health: Arc<HealthState>,
    pub authenticator: Arc<PeerAuthenticator>,
    pub cluster_identifier: Arc<str>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn HostStateStore>,
        health: Arc<HealthState>,
        authenticator: PeerAuthenticator,
        cluster_identifier: &str,
    ) -> Self {
        Self {
            store,
            health,
            authenticator: Arc::new(authenticator),
            cluster_identifier: Arc::from(cluster_identifier),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .merge(peer::create_peer_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
