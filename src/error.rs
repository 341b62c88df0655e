use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the harvester
#[derive(Error, Debug)]
pub enum HarvestError {
    // Pool errors
    #[error("No valid proxies available")]
    NoProxiesAvailable,

    #[error("Proxy not found: {key}")]
    ProxyNotFound { key: String },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Probe errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Operation timed out")]
    Timeout,

    // Source errors
    #[error("Source {source_name} failed: {message}")]
    SourceFailed {
        source_name: String,
        message: String,
    },

    // Persistence errors
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            HarvestError::InvalidRequest(_)
            | HarvestError::InvalidProxyAddress(_)
            | HarvestError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            HarvestError::ProxyNotFound { .. } | HarvestError::NoProxiesAvailable => {
                StatusCode::NOT_FOUND
            }

            // 502 Bad Gateway
            HarvestError::ProxyConnectionFailed(_)
            | HarvestError::SourceFailed { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            HarvestError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            HarvestError::Snapshot(_)
            | HarvestError::Io(_)
            | HarvestError::Http(_)
            | HarvestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for HarvestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HarvestError::Timeout
        } else {
            HarvestError::Http(err.to_string())
        }
    }
}

impl From<url::ParseError> for HarvestError {
    fn from(err: url::ParseError) -> Self {
        HarvestError::InvalidRequest(err.to_string())
    }
}
