use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::models::BookingRequest;
use crate::services::booking::{self, BookingOutcome};
use crate::state::AppState;

// POST /api/tenants/:tenant_id/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<BookingRequest>,
) -> Result<Response, AppError> {
    match booking::create_booking(&state, &tenant_id, &req).await? {
        BookingOutcome::Booked(receipt) => Ok((StatusCode::CREATED, Json(receipt)).into_response()),
        BookingOutcome::AwaitingPayment(pending) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "awaiting_payment",
                "correlation_id": pending.correlation_id,
                "provider": pending.provider,
                "expires_at": pending.expires_at,
            })),
        )
            .into_response()),
    }
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub cancel_token: String,
}

// POST /api/bookings/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let booking = booking::cancel_booking(&state, &body.cancel_token)?;
    Ok(Json(json!({
        "success": true,
        "booking_id": booking.id,
        "status": booking.status,
    })))
}
