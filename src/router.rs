use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Every public and admin route, without middleware.
///
/// ```ignore
/// let app = app_router(state).layer(TraceLayer::new_for_http());
/// ```
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/api/tenants/:tenant_id/availability",
            get(handlers::availability::get_availability),
        )
        .route(
            "/api/tenants/:tenant_id/bookings",
            post(handlers::bookings::create_booking),
        )
        .route("/api/bookings/cancel", post(handlers::bookings::cancel_booking))
        .route(
            "/api/payments/:correlation_id/confirm",
            post(handlers::payments::confirm_payment),
        )
        .route(
            "/api/payments/:correlation_id/abandon",
            post(handlers::payments::abandon_payment),
        )
        .route("/webhook/payments", post(handlers::webhook::payment_webhook))
        .route("/calendar/:booking_id", get(handlers::calendar::download_ics))
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route(
            "/api/admin/bookings/:id/status",
            post(handlers::admin::set_booking_status),
        )
        .route(
            "/api/admin/reconciliation",
            get(handlers::admin::get_reconciliation),
        )
        .with_state(state)
}
