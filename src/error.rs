//! Error types for scanlink

use std::time::Duration;
use thiserror::Error;

/// Result type alias for scanlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the library and CLI
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Interactive prompt error: {0}")]
    Dialoguer(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

impl From<dialoguer::Error> for Error {
    fn from(err: dialoguer::Error) -> Self {
        Error::Dialoguer(err.to_string())
    }
}

impl Error {
    /// The underlying API error, if this error came from the network layer.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors produced while talking to the remote API.
///
/// `Clone` so that a single settled outcome can be handed to every caller
/// coalesced onto the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Transport failure: no HTTP response was obtained
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the per-attempt timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP response with a non-2xx status
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    /// 2xx response whose body could not be decoded
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status code, for errors that carry one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 400-499 responses are terminal and never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => true,
            ApiError::Status { .. } => !self.is_client_error(),
            ApiError::InvalidResponse(_) => false,
        }
    }

    /// Human-readable message, preferring the one the API put in the body.
    pub fn message(&self) -> String {
        match self {
            ApiError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("Failed to connect to API".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Live-event socket failures.
///
/// Internal to the socket layer; the reconnector turns them into state
/// transitions instead of returning them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("WebSocket connect failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SocketError::Transport(err.to_string())
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found.")]
    NotFound,

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            status: code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_client_errors_are_terminal() {
        for code in [400, 401, 403, 404, 422, 429, 499] {
            let err = status(code);
            assert!(err.is_client_error(), "{code} should be a client error");
            assert!(!err.is_retryable(), "{code} should not be retried");
        }
    }

    #[test]
    fn test_server_errors_are_retryable() {
        for code in [500, 502, 503, 504] {
            assert!(status(code).is_retryable());
        }
    }

    #[test]
    fn test_network_and_timeout_are_retryable() {
        assert!(ApiError::Network("reset".to_string()).is_retryable());
        assert!(ApiError::Timeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn test_invalid_response_is_terminal() {
        assert!(!ApiError::InvalidResponse("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_unauthorized() {
        assert!(status(401).is_unauthorized());
        assert!(!status(403).is_unauthorized());
        assert!(!ApiError::Network("x".to_string()).is_unauthorized());
    }

    #[test]
    fn test_status_message_prefers_body_message() {
        let err = ApiError::Status {
            status: 401,
            message: "Invalid email or password".to_string(),
        };
        assert_eq!(err.message(), "Invalid email or password");
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ApiError::Timeout(Duration::from_millis(30_000));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_error_from_api_error() {
        let err: Error = ApiError::Network("down".to_string()).into();
        match err {
            Error::Api(ApiError::Network(msg)) => assert_eq!(msg, "down"),
            _ => panic!("Expected Error::Api(ApiError::Network)"),
        }
    }

    #[test]
    fn test_as_api() {
        let err: Error = status(404).into();
        assert_eq!(err.as_api().and_then(ApiError::status), Some(404));
        assert!(Error::Validation("x".to_string()).as_api().is_none());
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_str = "invalid: [yaml: content";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let config_err: ConfigError = yaml_err.into();

        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }
}
