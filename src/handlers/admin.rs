use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, ReconciliationItem};
use crate::services::booking;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

// GET /api/admin/bookings
pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            BookingStatus::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("unknown booking status: {raw}")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let bookings = {
        let db = state.db();
        queries::get_all_bookings(&db, status.as_ref().map(BookingStatus::as_str), limit)?
    };
    Ok(Json(bookings))
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

// POST /api/admin/bookings/:id/status
pub async fn set_booking_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let next = BookingStatus::parse(body.status.trim())
        .ok_or_else(|| AppError::Validation(format!("unknown booking status: {}", body.status)))?;
    let booking = booking::set_booking_status(&state, &id, next)?;
    Ok(Json(booking))
}

// GET /api/admin/reconciliation
pub async fn get_reconciliation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReconciliationItem>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let items = {
        let db = state.db();
        queries::list_reconciliation_items(&db, 200)?
    };
    Ok(Json(items))
}
