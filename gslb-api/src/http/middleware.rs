// HTTP middleware

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use gslb_core::config::PeerConfig;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::{AppError, AppState};

/// Maps inbound API keys to the peer cluster that owns them
#[derive(Debug, Clone, Default)]
pub struct PeerAuthenticator {
    keys: Vec<(String, String)>,
}

impl PeerAuthenticator {
    #[must_use]
    pub fn new(peers: &[PeerConfig]) -> Self {
        Self {
            keys: peers
                .iter()
                .filter(|p| !p.api_key.is_empty())
                .map(|p| (p.api_key.clone(), p.cluster_identifier.clone()))
                .collect(),
        }
    }

    /// Cluster identifier owning `token`, if any.
    ///
    /// Every configured key is compared so timing does not reveal which one matched.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<&str> {
        let mut matched = None;
        for (key, cluster) in &self.keys {
            let equal = key.len() == token.len() && bool::from(key.as_bytes().ct_eq(token.as_bytes()));
            if equal && matched.is_none() {
                matched = Some(cluster.as_str());
            }
        }
        matched
    }
}

/// Peer cluster identified by its bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerCluster(pub String);

impl<S> FromRequestParts<S> for CallerCluster
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
            .to_str()
            .map_err(|_| AppError::unauthorized("Invalid Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("Expected Bearer token"))?;

        app_state
            .authenticator
            .authenticate(token)
            .map(|cluster| Self(cluster.to_string()))
            .ok_or_else(|| {
                warn!("Peer request with unknown API key");
                AppError::unauthorized("Unknown API key")
            })
    }
}
