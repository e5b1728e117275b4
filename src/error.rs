use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid IP address: {0}")]
    InvalidInput(String),

    #[error("Database not available")]
    ServiceUnavailable,

    #[error("Lookup failed: {0}")]
    LookupError(String),

    #[error("Download failed: {message}")]
    DownloadError {
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid database archive: {0}")]
    ArchiveFormatError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Download failure caused by a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        AppError::DownloadError {
            status: Some(status.as_u16()),
            message: format!("provider returned status {}", status),
        }
    }

    /// HTTP status carried by a download failure, if any
    pub fn download_status(&self) -> Option<u16> {
        match self {
            AppError::DownloadError { status, .. } => *status,
            _ => None,
        }
    }
}

// The request URL carries the license key, so it is stripped from the message
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        AppError::DownloadError {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<maxminddb::MaxMindDBError> for AppError {
    fn from(err: maxminddb::MaxMindDBError) -> Self {
        AppError::LookupError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::IoError(format!("Blocking task failed: {}", err))
    }
}

// Implement axum's IntoResponse for HTTP error responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::LookupError(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DownloadError { .. }
            | AppError::ArchiveFormatError(_)
            | AppError::IoError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}
