use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] opendal::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether the failure is worth retrying on the next tick (network or storage hiccup).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::ObjectStore(_) | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
