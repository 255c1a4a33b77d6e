use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

/// Why a work calendar could not be built from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("weekday {0} is out of range (0 = Sunday .. 6 = Saturday)")]
    InvalidWeekday(u32),

    #[error("hour {0} is out of range (0..=23)")]
    InvalidHour(u32),

    #[error("work start hour {start_hour} must be before work end hour {end_hour}")]
    EmptyWindow { start_hour: u32, end_hour: u32 },

    #[error("invalid UTC offset '{0}': expected +HH:MM or -HH:MM")]
    InvalidOffset(String),
}

/// Failure talking to the issue tracker.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{context}: {status} - {status_text}")]
    Status {
        context: String,
        status: u16,
        status_text: String,
    },

    #[error("{context}: no response received ({reason})")]
    Transport { context: String, reason: String },

    #[error("{context}: unreadable response ({reason})")]
    Decode { context: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("upstream call did not complete: {0}")]
    Join(String),

    #[error("invalid base url '{url}': {reason}")]
    BaseUrl { url: String, reason: String },
}

impl UpstreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for UpstreamError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        error!(status = status.as_u16(), error = %self, "request failed upstream");
        message_response(status, self.to_string())
    }
}

/// `{ "message": ... }` body with the given status.
pub fn message_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

/// 400 for a body or path the extractors refused.
pub fn bad_request(reason: String) -> Response {
    warn!(%reason, "rejected request");
    message_response(StatusCode::BAD_REQUEST, reason)
}
