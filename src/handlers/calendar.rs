use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::db::queries;
use crate::services::calendar::generate_ics;
use crate::state::AppState;

// GET /calendar/:booking_id
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Response {
    let booking_id = raw_id.strip_suffix(".ics").unwrap_or(&raw_id);

    let loaded = {
        let db = state.db();
        queries::get_booking_by_id(&db, booking_id).and_then(|booking| match booking {
            Some(b) => {
                let service_name = queries::get_service(&db, &b.tenant_id, &b.service_id)?
                    .map(|s| s.name)
                    .unwrap_or_else(|| "Appointment".to_string());
                Ok(Some((b, service_name)))
            }
            None => Ok(None),
        })
    };

    let (booking, service_name) = match loaded {
        Ok(Some(found)) => found,
        Ok(None) => return (StatusCode::NOT_FOUND, "Booking not found").into_response(),
        Err(e) => {
            tracing::error!(error = %e, booking_id, "failed to load booking for .ics");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };

    let ics = generate_ics(&booking, &service_name);
    let filename = format!("booking-{booking_id}.ics");

    (
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        ics,
    )
        .into_response()
}
