//! JSON envelope of the history and sensor API.
//!
//! ```text
//! 200  { "data": ..., "meta": { "service", "version", "generated_at" } }
//! 4xx  { "error": { "code", "message" }, "meta": { ... } }
//! 5xx
//! ```
//!
//! Error codes name what went wrong for the dashboard, not the HTTP class:
//!
//! | Code              | Status | Raised by                           |
//! |-------------------|--------|-------------------------------------|
//! | `BAD_TIME_BOUND`  | 400    | unusable history range              |
//! | `UNKNOWN_SENSOR`  | 404    | reset of an id without tracking row |
//! | `STORAGE_FAILURE` | 500    | sled / serialization errors         |

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StorageError;

#[derive(Debug, Serialize)]
pub struct Meta {
    pub service: &'static str,
    pub version: &'static str,
    pub generated_at: DateTime<Utc>,
}

impl Meta {
    fn now() -> Self {
        Self {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DataBody<T> {
    data: T,
    meta: Meta,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    meta: Meta,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// 200 with `data` wrapped in the envelope.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(DataBody {
        data,
        meta: Meta::now(),
    })
    .into_response()
}

/// Which end of a history range a bound error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

impl Bound {
    pub const fn param(self) -> &'static str {
        match self {
            Self::Start => "start_time",
            Self::End => "end_time",
        }
    }
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.param())
    }
}

/// Failure of an API request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} is required")]
    MissingBound(Bound),

    #[error("{bound} is not an ISO-8601 timestamp: {raw}")]
    InvalidBound { bound: Bound, raw: String },

    #[error("start_time {start} is after end_time {end}")]
    InvertedRange { start: DateTime<Utc>, end: DateTime<Utc> },

    #[error("no tracked sensor with id {0}")]
    UnknownSensor(u8),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnknownSensor(id) => Self::UnknownSensor(id),
            other => Self::Storage(other),
        }
    }
}

impl ApiError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingBound(_) | Self::InvalidBound { .. } | Self::InvertedRange { .. } => {
                "BAD_TIME_BOUND"
            }
            Self::UnknownSensor(_) => "UNKNOWN_SENSOR",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingBound(_) | Self::InvalidBound { .. } | Self::InvertedRange { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownSensor(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Storage(e) = &self {
            tracing::error!(error = %e, "[Api] Storage failure");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
            meta: Meta::now(),
        };
        (self.status(), Json(body)).into_response()
    }
}
