use std::fmt;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::{BookingStatus, Window};
use crate::services::pricing::PriceError;

/// Why a window could not be booked or reserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Blocked, overridden off, or outside the provider's weekly rules.
    Unavailable,
    /// Overlaps a confirmed or in-progress booking.
    Reserved(Window),
    /// Overlaps a window another request is reserving for the same provider.
    InFlight(Window),
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::Unavailable => f.write_str("provider is not available"),
            ConflictReason::Reserved(w) => write!(f, "overlaps reserved window {w}"),
            ConflictReason::InFlight(w) => write!(f, "overlaps window {w} being reserved"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("window {window} conflicts: {reason}")]
    Conflict { window: Window, reason: ConflictReason },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BookingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BookingError::Validation(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation_error",
            BookingError::Conflict { .. } => "conflict",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::NotFound(_) => "not_found",
            BookingError::Price(PriceError::InvalidUnit(_)) => "invalid_unit",
            BookingError::Price(PriceError::NegativeInput(_)) => "negative_input",
            BookingError::Price(PriceError::Overflow(_)) => "price_overflow",
            BookingError::Storage(_) => "internal_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("unauthorized")]
    Unauthorized,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Booking(BookingError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Booking(BookingError::validation(rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::Unauthorized => {
                let body = serde_json::json!({
                    "error": "unauthorized",
                    "message": "unauthorized",
                });
                return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
            }
            AppError::Booking(err) => err,
        };

        let status = match &err {
            BookingError::Validation(_) | BookingError::Price(_) => StatusCode::BAD_REQUEST,
            BookingError::Conflict { .. } | BookingError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut body = serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        });
        match &err {
            BookingError::Conflict { window, reason } => {
                body["window"] = serde_json::json!(window);
                if let ConflictReason::Reserved(existing) | ConflictReason::InFlight(existing) =
                    reason
                {
                    body["conflicting_window"] = serde_json::json!(existing);
                }
            }
            BookingError::InvalidTransition { from, to } => {
                body["from"] = serde_json::json!(from);
                body["to"] = serde_json::json!(to);
            }
            BookingError::Storage(_) => {
                body["message"] = serde_json::json!("internal error");
            }
            _ => {}
        }

        (status, axum::Json(body)).into_response()
    }
}
