use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::availability::parse_date;
use crate::models::{AvailabilitySlot, StaffSelection};
use crate::services::availability;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub service_id: String,
    pub date: String,
    /// A staff id, or `any` for the pooled view.
    pub staff_id: Option<String>,
}

// GET /api/tenants/:tenant_id/availability
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<AvailabilitySlot>>, AppError> {
    let date = parse_date(query.date.trim()).map_err(|e| AppError::Validation(e.to_string()))?;
    let selection = StaffSelection::parse(query.staff_id.as_deref().unwrap_or("any"));
    let now = Utc::now().naive_utc();

    let slots = {
        let db = state.db();
        availability::get_availability(
            &db,
            &tenant_id,
            query.service_id.trim(),
            date,
            &selection,
            now,
        )?
    };

    Ok(Json(slots))
}
