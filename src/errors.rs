use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad or missing input; nothing external was called.
    #[error("validation error: {0}")]
    Validation(String),

    /// The slot was taken between read and write; re-fetch availability.
    #[error("slot conflict: {0}")]
    SlotConflict(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// The booking could not be written after retries. When payment was
    /// captured the attempt has been queued for manual reconciliation.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::SlotConflict(_) => "slot_conflict",
            AppError::PaymentFailed(_) => "payment_failed",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::Persistence(_) => "persistence_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::SlotConflict(_) => StatusCode::CONFLICT,
            AppError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let AppError::Internal(e) = &self {
            tracing::error!(error = %e, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, axum::Json(body)).into_response()
    }
}
