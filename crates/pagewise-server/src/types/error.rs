//! Error types and HTTP error codes for the server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use pagewise::{ProfileError, ScrapeError};

/// Stable machine-readable error codes.
pub mod error_codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const EMPTY_TEMPLATE: &str = "empty_template";
    pub const SESSION_SETUP: &str = "session_setup_failed";
    pub const SESSION_NOT_FOUND: &str = "session_not_found";
    pub const BROWSER_UNAVAILABLE: &str = "browser_unavailable";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// All errors that can occur in the server.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        use error_codes::*;
        match self {
            ServerError::InvalidRequest(_) => INVALID_REQUEST,
            ServerError::Scrape(ScrapeError::Validation(_)) => INVALID_REQUEST,
            ServerError::Scrape(ScrapeError::EmptyTemplate(_)) => EMPTY_TEMPLATE,
            ServerError::Scrape(ScrapeError::SessionSetup(_)) => SESSION_SETUP,
            ServerError::SessionNotFound(_) => SESSION_NOT_FOUND,
            ServerError::BrowserUnavailable(_) => BROWSER_UNAVAILABLE,
            ServerError::Profile(_) | ServerError::Io(_) => INTERNAL_ERROR,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Scrape(ScrapeError::Validation(_) | ScrapeError::EmptyTemplate(_)) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Scrape(ScrapeError::SessionSetup(_)) => StatusCode::BAD_GATEWAY,
            ServerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BrowserUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Profile(_) | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Convenience result type.
pub type ServerResult<T> = Result<T, ServerError>;
