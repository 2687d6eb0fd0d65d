//! Shared error types for the SkyCache crates.
//!
//! Domain crates define their own error enums and embed these where a
//! failure crosses a shared concern (configuration, outbound HTTP).

use thiserror::Error;

/// Network-related errors (HTTP, connectivity).
///
/// Messages never include the request URL, which carries credentials.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        let err = self.without_url();
        if err.is_timeout() {
            NetworkError::Timeout
        } else if err.is_decode() || err.is_body() {
            NetworkError::InvalidResponse(err.to_string())
        } else {
            NetworkError::ConnectionFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingSetting("VISUAL_CROSSING_API_KEY".into());
        assert_eq!(
            err.to_string(),
            "Missing required setting: VISUAL_CROSSING_API_KEY"
        );
    }

    #[tokio::test]
    async fn test_network_error_omits_request_url() {
        // Nothing listens on the discard port.
        let err = reqwest::get("http://127.0.0.1:9/London?key=SECRET-KEY")
            .await
            .unwrap_err()
            .into_network_error();

        assert!(matches!(err, NetworkError::ConnectionFailed(_)));
        let msg = err.to_string();
        assert!(!msg.contains("SECRET-KEY"));
        assert!(!msg.contains("127.0.0.1:9/London"));
    }
}
