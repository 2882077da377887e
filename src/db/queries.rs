use std::collections::HashMap;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::availability::{format_date, format_time, parse_date, parse_time};
use crate::models::{
    AttemptOutcome, Booking, BookingStatus, Client, Location, PendingPayment,
    PendingPaymentStatus, ReconciliationItem, Service, StaffMember, WeeklyAvailability,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .with_context(|| format!("invalid stored timestamp: {s}"))
}

// ── Services, Staff, Locations ──

pub fn save_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, tenant_id, name, category, duration_minutes, price_cents, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
           tenant_id = excluded.tenant_id,
           name = excluded.name,
           category = excluded.category,
           duration_minutes = excluded.duration_minutes,
           price_cents = excluded.price_cents,
           active = excluded.active",
        params![
            service.id,
            service.tenant_id,
            service.name,
            service.category,
            service.duration_minutes,
            service.price_cents,
            service.active,
        ],
    )?;
    Ok(())
}

pub fn get_service(
    conn: &Connection,
    tenant_id: &str,
    id: &str,
) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            "SELECT id, tenant_id, name, category, duration_minutes, price_cents, active
             FROM services WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, id],
            |row| {
                Ok(Service {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    category: row.get(3)?,
                    duration_minutes: row.get(4)?,
                    price_cents: row.get(5)?,
                    active: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(service)
}

pub fn save_staff(conn: &Connection, staff: &StaffMember) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO staff (id, tenant_id, name, category, active)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           tenant_id = excluded.tenant_id,
           name = excluded.name,
           category = excluded.category,
           active = excluded.active",
        params![staff.id, staff.tenant_id, staff.name, staff.category, staff.active],
    )?;
    Ok(())
}

/// Active staff of a tenant whose category matches, ordered by id.
pub fn get_staff_for_category(
    conn: &Connection,
    tenant_id: &str,
    category: &str,
) -> anyhow::Result<Vec<StaffMember>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, name, category, active FROM staff
         WHERE tenant_id = ?1 AND category = ?2 AND active = 1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![tenant_id, category], |row| {
        Ok(StaffMember {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            active: row.get(4)?,
        })
    })?;

    let mut staff = vec![];
    for row in rows {
        staff.push(row?);
    }
    Ok(staff)
}

pub fn save_location(conn: &Connection, location: &Location) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO locations (id, tenant_id, name, active) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           tenant_id = excluded.tenant_id,
           name = excluded.name,
           active = excluded.active",
        params![location.id, location.tenant_id, location.name, location.active],
    )?;
    Ok(())
}

pub fn get_location(
    conn: &Connection,
    tenant_id: &str,
    id: &str,
) -> anyhow::Result<Option<Location>> {
    let location = conn
        .query_row(
            "SELECT id, tenant_id, name, active FROM locations WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, id],
            |row| {
                Ok(Location {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    active: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(location)
}

// ── Weekly Availability ──

pub fn add_weekly_availability(
    conn: &Connection,
    window: &WeeklyAvailability,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO weekly_availability (staff_id, day_of_week, start_time, end_time, is_available)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            window.staff_id,
            window.day_of_week,
            format_time(&window.start_time),
            format_time(&window.end_time),
            window.is_available,
        ],
    )?;
    Ok(())
}

pub fn get_weekly_availability(
    conn: &Connection,
    staff_id: &str,
    day_of_week: u32,
) -> anyhow::Result<Vec<WeeklyAvailability>> {
    let mut stmt = conn.prepare(
        "SELECT staff_id, day_of_week, start_time, end_time, is_available
         FROM weekly_availability WHERE staff_id = ?1 AND day_of_week = ?2
         ORDER BY start_time ASC",
    )?;
    let rows = stmt.query_map(params![staff_id, day_of_week], |row| {
        let start: String = row.get(2)?;
        let end: String = row.get(3)?;
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?, start, end, row.get::<_, bool>(4)?))
    })?;

    let mut windows = vec![];
    for row in rows {
        let (staff_id, day_of_week, start, end, is_available) = row?;
        windows.push(WeeklyAvailability {
            staff_id,
            day_of_week,
            start_time: parse_time(&start)?,
            end_time: parse_time(&end)?,
            is_available,
        });
    }
    Ok(windows)
}

// ── Bookings ──

/// Result of a booking insert that lost no data but may have lost a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another live booking for this staff member overlaps the interval.
    SlotTaken,
    /// A booking already exists for this payment reference.
    DuplicatePayment,
}

const BOOKING_COLUMNS: &str = "id, tenant_id, service_id, staff_id, location_id, customer_name, \
     customer_email, customer_phone, booking_date, booking_time, duration_minutes, status, \
     total_price_cents, payment_provider, payment_reference, cancel_token, created_at, updated_at";

const START_MINUTES: &str =
    "(CAST(substr(booking_time, 1, 2) AS INTEGER) * 60 + CAST(substr(booking_time, 4, 2) AS INTEGER))";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<InsertOutcome> {
    let start_min = booking.booking_time.num_seconds_from_midnight() as i64 / 60;
    let end_min = start_min + booking.duration_minutes as i64;

    // The select only yields a row when no live booking for this staff member
    // overlaps the new interval, so check and write happen in one statement.
    let result = conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
             WHERE ?12 = 'cancelled' OR NOT EXISTS (
                 SELECT 1 FROM bookings
                 WHERE staff_id = ?4 AND booking_date = ?9 AND status != 'cancelled'
                   AND {START_MINUTES} < ?20
                   AND {START_MINUTES} + duration_minutes > ?19
             )"
        ),
        params![
            booking.id,
            booking.tenant_id,
            booking.service_id,
            booking.staff_id,
            booking.location_id,
            booking.customer_name,
            booking.customer_email,
            booking.customer_phone,
            format_date(&booking.booking_date),
            format_time(&booking.booking_time),
            booking.duration_minutes,
            booking.status.as_str(),
            booking.total_price_cents,
            booking.payment_provider,
            booking.payment_reference,
            booking.cancel_token,
            format_timestamp(&booking.created_at),
            format_timestamp(&booking.updated_at),
            start_min,
            end_min,
        ],
    );

    match result {
        Ok(0) => Ok(InsertOutcome::SlotTaken),
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(rusqlite::Error::SqliteFailure(err, Some(msg)))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.starts_with("UNIQUE constraint failed") =>
        {
            if msg.contains("bookings.payment_reference") {
                Ok(InsertOutcome::DuplicatePayment)
            } else if msg.contains("bookings.staff_id") {
                Ok(InsertOutcome::SlotTaken)
            } else {
                Err(anyhow::anyhow!("booking insert rejected: {msg}"))
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Bookings of a tenant on one date that still hold their slot.
pub fn get_live_bookings_on(
    conn: &Connection,
    tenant_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE tenant_id = ?1 AND booking_date = ?2 AND status != 'cancelled'
         ORDER BY booking_time ASC"
    ))?;
    let rows = stmt.query_map(params![tenant_id, format_date(date)], |row| {
        Ok(parse_booking_row(row))
    })?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn get_booking_by_cancel_token(
    conn: &Connection,
    token: &str,
) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE cancel_token = ?1"),
            params![token],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn get_booking_by_payment_reference(
    conn: &Connection,
    reference: &str,
) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE payment_reference = ?1"),
            params![reference],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;
    result.transpose()
}

/// Moves a booking to `to` only if it is currently `from`. Returns whether a
/// row changed.
pub fn transition_booking_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
) -> anyhow::Result<bool> {
    let now = format_timestamp(&Utc::now().naive_utc());
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), now, id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn get_all_bookings(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1
                 ORDER BY booking_date DESC, booking_time DESC LIMIT ?2"
            ),
            vec![
                Box::new(status.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
        None => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 ORDER BY booking_date DESC, booking_time DESC LIMIT ?1"
            ),
            vec![Box::new(limit) as Box<dyn rusqlite::types::ToSql>],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Latest `created_at` of each staff member's live bookings within a tenant.
pub fn get_last_booked_at(
    conn: &Connection,
    tenant_id: &str,
) -> anyhow::Result<HashMap<String, NaiveDateTime>> {
    let mut stmt = conn.prepare(
        "SELECT staff_id, MAX(created_at) FROM bookings
         WHERE tenant_id = ?1 AND status != 'cancelled' GROUP BY staff_id",
    )?;
    let rows = stmt.query_map(params![tenant_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut last = HashMap::new();
    for row in rows {
        let (staff_id, created_at) = row?;
        last.insert(staff_id, parse_timestamp(&created_at)?);
    }
    Ok(last)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let date_str: String = row.get(8)?;
    let time_str: String = row.get(9)?;
    let status_str: String = row.get(11)?;
    let created_at_str: String = row.get(16)?;
    let updated_at_str: String = row.get(17)?;

    Ok(Booking {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        service_id: row.get(2)?,
        staff_id: row.get(3)?,
        location_id: row.get(4)?,
        customer_name: row.get(5)?,
        customer_email: row.get(6)?,
        customer_phone: row.get(7)?,
        booking_date: parse_date(&date_str)?,
        booking_time: parse_time(&time_str)?,
        duration_minutes: row.get(10)?,
        status: BookingStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown booking status: {status_str}"))?,
        total_price_cents: row.get(12)?,
        payment_provider: row.get(13)?,
        payment_reference: row.get(14)?,
        cancel_token: row.get(15)?,
        created_at: parse_timestamp(&created_at_str)?,
        updated_at: parse_timestamp(&updated_at_str)?,
    })
}

// ── Pending Payments ──

pub fn insert_pending_payment(conn: &Connection, pending: &PendingPayment) -> anyhow::Result<()> {
    let request = serde_json::to_string(&pending.request)?;
    conn.execute(
        "INSERT INTO pending_payments (correlation_id, tenant_id, request, provider, amount_cents, currency, status, provider_status, booking_id, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            pending.correlation_id,
            pending.tenant_id,
            request,
            pending.provider,
            pending.amount_cents,
            pending.currency,
            pending.status.as_str(),
            pending.provider_status.map(|s| s.as_str()),
            pending.booking_id,
            format_timestamp(&pending.created_at),
            format_timestamp(&pending.expires_at),
        ],
    )?;
    Ok(())
}

pub fn get_pending_payment(
    conn: &Connection,
    correlation_id: &str,
) -> anyhow::Result<Option<PendingPayment>> {
    let row = conn
        .query_row(
            "SELECT correlation_id, tenant_id, request, provider, amount_cents, currency, status, provider_status, booking_id, created_at, expires_at, settling_since
             FROM pending_payments WHERE correlation_id = ?1",
            params![correlation_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, Option<String>>(11)?,
                ))
            },
        )
        .optional()?;

    let Some((
        correlation_id,
        tenant_id,
        request,
        provider,
        amount_cents,
        currency,
        status,
        provider_status,
        booking_id,
        created_at,
        expires_at,
        settling_since,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(PendingPayment {
        correlation_id,
        tenant_id,
        request: serde_json::from_str(&request).context("corrupt pending booking request")?,
        provider,
        amount_cents,
        currency,
        status: PendingPaymentStatus::parse(&status),
        provider_status: provider_status.as_deref().and_then(AttemptOutcome::parse),
        booking_id,
        created_at: parse_timestamp(&created_at)?,
        expires_at: parse_timestamp(&expires_at)?,
        settling_since: settling_since.as_deref().map(parse_timestamp).transpose()?,
    }))
}

/// Conditional status change; only one caller can win a given `from → to`.
/// Moving into `settling` stamps the claim time.
pub fn transition_pending_payment(
    conn: &Connection,
    correlation_id: &str,
    from: PendingPaymentStatus,
    to: PendingPaymentStatus,
    booking_id: Option<&str>,
) -> anyhow::Result<bool> {
    let now = format_timestamp(&Utc::now().naive_utc());
    let count = conn.execute(
        "UPDATE pending_payments SET status = ?1, booking_id = COALESCE(?2, booking_id),
             settling_since = CASE WHEN ?1 = 'settling' THEN ?5 ELSE settling_since END
         WHERE correlation_id = ?3 AND status = ?4",
        params![to.as_str(), booking_id, correlation_id, from.as_str(), now],
    )?;
    Ok(count > 0)
}

/// Takes over a `settling` claim that was made before `stale_before`.
/// Only one caller can win it.
pub fn reclaim_settlement(
    conn: &Connection,
    correlation_id: &str,
    stale_before: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let now = format_timestamp(&Utc::now().naive_utc());
    let count = conn.execute(
        "UPDATE pending_payments SET settling_since = ?1
         WHERE correlation_id = ?2 AND status = 'settling'
           AND (settling_since IS NULL OR settling_since <= ?3)",
        params![now, correlation_id, format_timestamp(stale_before)],
    )?;
    Ok(count > 0)
}

/// Stores what the provider reported. A terminal outcome is never
/// overwritten. Returns `None` for an unknown correlation id, otherwise
/// the status now on record.
pub fn record_provider_status(
    conn: &Connection,
    correlation_id: &str,
    outcome: AttemptOutcome,
) -> anyhow::Result<Option<AttemptOutcome>> {
    conn.execute(
        "UPDATE pending_payments SET provider_status = ?1
         WHERE correlation_id = ?2 AND (provider_status IS NULL OR provider_status = 'pending')",
        params![outcome.as_str(), correlation_id],
    )?;
    let stored = conn
        .query_row(
            "SELECT provider_status FROM pending_payments WHERE correlation_id = ?1",
            params![correlation_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(stored.map(|s| s.as_deref().and_then(AttemptOutcome::parse).unwrap_or(outcome)))
}

// ── Reconciliation ──

pub fn insert_reconciliation_item(
    conn: &Connection,
    item: &ReconciliationItem,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO reconciliation_items (id, tenant_id, provider, reference, amount_cents, reason, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            item.id,
            item.tenant_id,
            item.provider,
            item.reference,
            item.amount_cents,
            item.reason,
            item.payload,
            format_timestamp(&item.created_at),
        ],
    )?;
    Ok(())
}

pub fn list_reconciliation_items(
    conn: &Connection,
    limit: i64,
) -> anyhow::Result<Vec<ReconciliationItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, provider, reference, amount_cents, reason, payload, created_at
         FROM reconciliation_items ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| Ok(parse_reconciliation_row(row)))?;

    let mut items = vec![];
    for row in rows {
        items.push(row??);
    }
    Ok(items)
}

fn parse_reconciliation_row(row: &rusqlite::Row) -> anyhow::Result<ReconciliationItem> {
    let created_at_str: String = row.get(7)?;
    Ok(ReconciliationItem {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        provider: row.get(2)?,
        reference: row.get(3)?,
        amount_cents: row.get(4)?,
        reason: row.get(5)?,
        payload: row.get(6)?,
        created_at: parse_timestamp(&created_at_str)?,
    })
}

// ── Clients ──

pub fn record_client_visit(
    conn: &Connection,
    tenant_id: &str,
    contact: &str,
    name: &str,
    at: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO clients (tenant_id, contact, name, total_bookings, last_booking_at)
         VALUES (?1, ?2, ?3, 1, ?4)
         ON CONFLICT(tenant_id, contact) DO UPDATE SET
           name = excluded.name,
           total_bookings = total_bookings + 1,
           last_booking_at = excluded.last_booking_at",
        params![tenant_id, contact, name, format_timestamp(at)],
    )?;
    Ok(())
}

pub fn get_client(
    conn: &Connection,
    tenant_id: &str,
    contact: &str,
) -> anyhow::Result<Option<Client>> {
    let client = conn
        .query_row(
            "SELECT tenant_id, contact, name, total_bookings, last_booking_at
             FROM clients WHERE tenant_id = ?1 AND contact = ?2",
            params![tenant_id, contact],
            |row| {
                Ok(Client {
                    tenant_id: row.get(0)?,
                    contact: row.get(1)?,
                    name: row.get(2)?,
                    total_bookings: row.get(3)?,
                    last_booking_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(client)
}
