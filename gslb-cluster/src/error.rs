//! Error types for cluster module

use thiserror::Error;

/// Cluster error types
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] gslb_core::Error),

    #[error("Peer {peer} request failed: {message}")]
    Peer { peer: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Discovery error: {0}")]
    Discovery(String),
}

impl Error {
    pub(crate) fn peer(peer: &str, message: impl Into<String>) -> Self {
        Self::Peer {
            peer: peer.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
