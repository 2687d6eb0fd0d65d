//! Weather-specific error types.

use skycache_core::NetworkError;
use thiserror::Error;

/// Failure talking to the weather provider.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to fetch weather data: {0}")]
    Network(#[from] NetworkError),

    #[error("failed to fetch weather data: status {status}, response: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode weather data: {0}")]
    Decode(String),
}

/// Failure talking to the cache store. Never raised for a missing key.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            CacheError::Unavailable(e.to_string())
        } else {
            CacheError::Command(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("location query parameter is required")]
    InvalidLocation,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl WeatherError {
    /// Message safe to return to an API client.
    ///
    /// Upstream failures are reported as-is; cache infrastructure details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidLocation => self.to_string(),
            Self::Fetch(e) => e.to_string(),
            Self::Cache(_) => "internal server error".to_string(),
        }
    }

    /// Whether the caller can fix the request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidLocation)
    }
}
