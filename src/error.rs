use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::{admission::AdmissionError, video_url::DecomposeError};

#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("Failed to set global logger")]
    SetGlobalLogger(#[from] tracing_log::log_tracer::SetLoggerError),
    #[error("Failed to set global subscriber")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Cache capacity must be > 0")]
    InvalidCacheCapacity,
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

/// Failures on the redirect decision path. None are retried internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedirectError {
    #[error("Admission exhausted, try again later")]
    AdmissionExhausted,
    #[error("Request cancelled before admission")]
    AdmissionCancelled,
    #[error(transparent)]
    UnparseableInput(#[from] DecomposeError),
}

impl RedirectError {
    /// Whether a caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, RedirectError::AdmissionExhausted)
    }
}

impl From<AdmissionError> for RedirectError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Exhausted => RedirectError::AdmissionExhausted,
            AdmissionError::Cancelled => RedirectError::AdmissionCancelled,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("Invalid JSON")]
    InvalidJson(#[from] JsonRejection),
    #[error("Invalid query")]
    InvalidQuery(#[from] QueryRejection),
    #[error("Invalid header value")]
    ResponseHeaderError(#[from] header::InvalidHeaderValue),
    #[error(transparent)]
    Redirect(#[from] RedirectError),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Client errors: no log. Admission pressure: warn!. Anything else: error!.
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "bad_request",
                    error: msg,
                    details: None,
                },
            ),
            ApiError::InvalidJson(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "invalid_json",
                    error: "Invalid JSON in request body",
                    details: None,
                },
            ),
            ApiError::InvalidQuery(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "bad_request",
                    error: "Missing or invalid `video` query parameter",
                    details: None,
                },
            ),
            ApiError::Redirect(RedirectError::UnparseableInput(e)) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "bad_request",
                    error: "Unparseable video URL",
                    details: Some(e.to_string()),
                },
            ),
            ApiError::Redirect(RedirectError::AdmissionExhausted) => {
                warn!("Admission exhausted - server overloaded");

                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody {
                        code: "service_unavailable",
                        error: "Service temporarily unavailable",
                        details: Some("Please try again later".to_string()),
                    },
                )
            }
            ApiError::Redirect(RedirectError::AdmissionCancelled) => {
                warn!("Redirect request cancelled while waiting for admission");

                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorBody {
                        code: "request_timeout",
                        error: "Request deadline exceeded",
                        details: None,
                    },
                )
            }
            ApiError::ResponseHeaderError(e) => {
                error!(error = ?e, "Failed to construct response header");

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "internal_error",
                        error: "Internal server error",
                        details: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
