use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha1::Sha1;

use crate::handlers::payments::payment_status_body;
use crate::models::AttemptOutcome;
use crate::services::booking;
use crate::state::AppState;

const WEBHOOK_PATH: &str = "/webhook/payments";

#[derive(Deserialize)]
pub struct PaymentWebhookForm {
    /// The provider's correlation id for the push.
    pub reference: String,
    pub status: String,
}

/// Checks a base64 HMAC-SHA1 over the full URL followed by every form
/// parameter, sorted by name, as `name` + `value`.
pub fn validate_signature(secret: &str, signature: &str, url: &str, params: &[(&str, &str)]) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };

    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let mut data = url.to_string();
    for (key, value) in &sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn webhook_url(headers: &HeaderMap) -> String {
    // Honour the proxy's view of the request when present
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{proto}://{host}{WEBHOOK_PATH}")
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// POST /webhook/payments
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<PaymentWebhookForm>,
) -> Response {
    let reference = form.reference.trim();
    tracing::info!(reference, status = %form.status, "payment provider callback");

    // No secret configured means local development
    let secret = &state.config.payment_webhook_secret;
    if !secret.is_empty() {
        let signature = headers
            .get("x-payment-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if signature.is_empty() {
            tracing::warn!(reference, "missing X-Payment-Signature header");
            return reject(StatusCode::FORBIDDEN, "missing signature");
        }

        let params = [("reference", form.reference.as_str()), ("status", form.status.as_str())];
        if !validate_signature(secret, signature, &webhook_url(&headers), &params) {
            tracing::warn!(reference, "invalid payment webhook signature");
            return reject(StatusCode::FORBIDDEN, "invalid signature");
        }
    }

    let Some(outcome) = AttemptOutcome::parse(form.status.trim()) else {
        tracing::warn!(reference, status = %form.status, "unrecognised payment status");
        return reject(StatusCode::BAD_REQUEST, "unknown payment status");
    };

    match booking::record_provider_callback(&state, reference, outcome).await {
        Ok(status) => Json(payment_status_body(&status)).into_response(),
        Err(e) => e.into_response(),
    }
}
