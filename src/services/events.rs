use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::db::queries;
use crate::models::Booking;
use crate::state::AppState;

/// Post-commit notifications. Listeners run outside the booking
/// transaction and may lag or miss events without affecting it.
#[derive(Debug, Clone)]
pub enum BookingEvent {
    Confirmed(Booking),
    Cancelled(Booking),
}

pub fn publish(state: &AppState, event: BookingEvent) {
    // No receivers is fine
    let _ = state.events_tx.send(event);
}

/// Upserts the customer's client record for a newly written booking.
pub fn record_client(conn: &Connection, booking: &Booking) -> anyhow::Result<bool> {
    let contact = booking
        .customer_email
        .as_deref()
        .map(str::to_lowercase)
        .or_else(|| booking.customer_phone.clone());

    let Some(contact) = contact else {
        return Ok(false);
    };

    queries::record_client_visit(
        conn,
        &booking.tenant_id,
        &contact,
        &booking.customer_name,
        &booking.created_at,
    )?;
    Ok(true)
}

pub fn spawn_client_sync(state: Arc<AppState>) -> JoinHandle<()> {
    let mut rx = state.events_tx.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BookingEvent::Confirmed(booking)) => {
                    let result = {
                        let db = state.db();
                        record_client(&db, &booking)
                    };
                    if let Err(e) = result {
                        tracing::error!(error = %e, booking_id = %booking.id, "failed to update client record");
                    }
                }
                Ok(BookingEvent::Cancelled(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "client sync fell behind booking events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
