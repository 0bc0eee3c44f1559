use crate::core::types::RequestError;
use reqwest::{StatusCode, Url};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request timed out: {url}")]
    Timeout { url: Url },

    #[error("Request quota exceeded: {url}")]
    QuotaExceeded { url: Url },

    #[error("Symbol not found: '{symbol}'")]
    SymbolNotFound { symbol: String },

    #[error("Bad request: {0}")]
    BadRequest(BadRequest),

    #[error("Unauthorized: {url}")]
    Unauthorized { url: Url },

    #[error("Protocol error ({status}): {body}")]
    Protocol { status: StatusCode, body: String },

    #[error("Keep-alive connection failed: {url}")]
    KeepAliveFailure { url: Url },

    #[error("HTTP transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
}

impl ClientError {
    /// Kinds the request executor recovers from locally instead of failing the call.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::QuotaExceeded { .. }
                | Self::SymbolNotFound { .. }
                | Self::KeepAliveFailure { .. }
        )
    }
}

/// A rejected request whose body carried the service's structured error object.
#[derive(Debug, Clone)]
pub struct BadRequest {
    pub raw_body: String,
    pub request_error: Option<RequestError>,
    pub parse_error_occurred: bool,
}

impl BadRequest {
    /// Keep the raw body and attempt to decode it; a failed decode is recorded, not raised.
    pub fn from_body(raw_body: String) -> Self {
        match serde_json::from_str::<RequestError>(&raw_body) {
            Ok(request_error) => Self {
                raw_body,
                request_error: Some(request_error),
                parse_error_occurred: false,
            },
            Err(_) => Self {
                raw_body,
                request_error: None,
                parse_error_occurred: true,
            },
        }
    }
}

impl std::fmt::Display for BadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.request_error {
            Some(err) => write!(f, "{} - {}", err.status_code, err.message),
            None => f.write_str(&self.raw_body),
        }
    }
}
