use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::services::booking::{self, AsyncPaymentStatus};
use crate::services::retry::RetryPolicy;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConfirmQuery {
    /// Hold the request open until the payment settles or times out.
    #[serde(default)]
    pub wait: bool,
}

pub(crate) fn payment_status_body(status: &AsyncPaymentStatus) -> Value {
    let mut body = json!({
        "paid": status.paid,
        "status": status.status,
    });
    if let Some(receipt) = &status.booking {
        body["booking_id"] = json!(receipt.booking_id);
        body["booking_status"] = json!(receipt.status);
        body["staff_id"] = json!(receipt.staff_id);
        body["cancel_token"] = json!(receipt.cancel_token);
    }
    body
}

// POST /api/payments/:correlation_id/confirm
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<Value>, AppError> {
    let status = if query.wait {
        booking::await_async_payment(&state, &correlation_id, &RetryPolicy::payment_poll()).await?
    } else {
        booking::confirm_async_payment(&state, &correlation_id).await?
    };
    Ok(Json(payment_status_body(&status)))
}

// POST /api/payments/:correlation_id/abandon
pub async fn abandon_payment(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let status = booking::abandon_async_payment(&state, &correlation_id)?;
    Ok(Json(json!({ "status": status })))
}
