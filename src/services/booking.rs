//! The booking transaction coordinator.
//!
//! Every attempt re-checks availability right before it commits, pays (or
//! parks the request while an asynchronous payment is outstanding), then
//! writes exactly one booking row. The insert itself refuses any interval
//! that overlaps a live booking for the same staff member, so it is the final
//! arbiter when two attempts race for the same or overlapping slots.

use base64::Engine;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rand::RngCore;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db::queries::{self, InsertOutcome};
use crate::errors::AppError;
use crate::models::availability::{format_date, format_time, hhmm, parse_date, parse_time};
use crate::models::{
    AttemptOutcome, Booking, BookingRequest, BookingStatus, Customer, PaymentAttempt, PaymentPlan,
    PendingPayment, PendingPaymentStatus, ReconciliationItem, Service, StaffSelection,
};
use crate::services::availability::{pick_staff, AssignmentPolicy, DaySnapshot};
use crate::services::events::{self, BookingEvent};
use crate::services::payment::{self, PaymentOutcome, PaymentRequest};
use crate::services::retry::RetryPolicy;
use crate::state::AppState;

/// Extra time a settlement claim is honoured beyond the worst-case write
/// retries before another caller may take it over.
const SETTLEMENT_GRACE_SECS: i64 = 30;

/// Phases of one booking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    SelectingSlot,
    Validating,
    AwaitingPayment,
    PaymentSucceeded,
    PaymentFailed,
    Persisting,
    Confirmed,
    Rejected,
}

impl AttemptPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptPhase::SelectingSlot => "selecting_slot",
            AttemptPhase::Validating => "validating",
            AttemptPhase::AwaitingPayment => "awaiting_payment",
            AttemptPhase::PaymentSucceeded => "payment_succeeded",
            AttemptPhase::PaymentFailed => "payment_failed",
            AttemptPhase::Persisting => "persisting",
            AttemptPhase::Confirmed => "confirmed",
            AttemptPhase::Rejected => "rejected",
        }
    }

    pub fn can_advance_to(&self, next: AttemptPhase) -> bool {
        use AttemptPhase::*;
        matches!(
            (self, next),
            (SelectingSlot, Validating)
                | (Validating, AwaitingPayment)
                | (Validating, Rejected)
                | (AwaitingPayment, PaymentSucceeded)
                | (AwaitingPayment, PaymentFailed)
                | (PaymentSucceeded, Persisting)
                | (PaymentFailed, Rejected)
                | (Persisting, Confirmed)
                | (Persisting, Rejected)
        )
    }
}

struct BookingAttempt {
    tenant_id: String,
    phase: AttemptPhase,
}

impl BookingAttempt {
    fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            phase: AttemptPhase::SelectingSlot,
        }
    }

    /// Picks up an attempt that was parked waiting for payment.
    fn resume_awaiting_payment(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            phase: AttemptPhase::AwaitingPayment,
        }
    }

    fn advance(&mut self, next: AttemptPhase) -> Result<(), AppError> {
        if !self.phase.can_advance_to(next) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "illegal booking attempt transition {} -> {}",
                self.phase.as_str(),
                next.as_str()
            )));
        }
        tracing::debug!(
            tenant_id = %self.tenant_id,
            from = self.phase.as_str(),
            to = next.as_str(),
            "booking attempt transition"
        );
        self.phase = next;
        Ok(())
    }

    /// Moves to `Rejected` (through `PaymentFailed` when waiting on payment)
    /// and hands back the error.
    fn reject(&mut self, err: AppError) -> AppError {
        if self.phase == AttemptPhase::AwaitingPayment {
            self.phase = AttemptPhase::PaymentFailed;
        }
        if self.phase.can_advance_to(AttemptPhase::Rejected) {
            self.phase = AttemptPhase::Rejected;
        }
        tracing::warn!(tenant_id = %self.tenant_id, code = err.code(), error = %err, "booking attempt rejected");
        err
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking_id: String,
    pub status: BookingStatus,
    pub staff_id: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub cancel_token: String,
}

impl From<&Booking> for BookingReceipt {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id.clone(),
            status: b.status,
            staff_id: b.staff_id.clone(),
            date: b.booking_date,
            time: b.booking_time,
            cancel_token: b.cancel_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AwaitingPayment {
    pub correlation_id: String,
    pub provider: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub enum BookingOutcome {
    Booked(BookingReceipt),
    AwaitingPayment(AwaitingPayment),
}

/// What `confirm_async_payment` reports back to a polling client.
#[derive(Debug, Clone)]
pub struct AsyncPaymentStatus {
    pub paid: bool,
    pub status: PendingPaymentStatus,
    pub booking: Option<BookingReceipt>,
}

impl AsyncPaymentStatus {
    fn unpaid(status: PendingPaymentStatus) -> Self {
        Self {
            paid: false,
            status,
            booking: None,
        }
    }

    fn paid(status: PendingPaymentStatus, booking: Option<BookingReceipt>) -> Self {
        Self {
            paid: true,
            status,
            booking,
        }
    }
}

/// A request that passed input validation, before slot resolution.
struct ValidatedRequest {
    date: NaiveDate,
    time: NaiveTime,
    selection: StaffSelection,
    customer: Customer,
    location_id: String,
    service_id: String,
}

/// 256 bits from the OS RNG, URL-safe.
pub fn generate_cancel_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn validate_request(
    conn: &Connection,
    tenant_id: &str,
    req: &BookingRequest,
) -> Result<ValidatedRequest, AppError> {
    let customer = req.customer.normalized();
    if customer.name.is_empty() {
        return Err(AppError::Validation("customer name is required".into()));
    }
    if let Some(email) = &customer.email {
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(AppError::Validation(format!("invalid email address: {email}")));
        }
    }

    let date = parse_date(req.date.trim()).map_err(|e| AppError::Validation(e.to_string()))?;
    let time = parse_time(req.time.trim()).map_err(|e| AppError::Validation(e.to_string()))?;

    let location_id = req.location_id.trim();
    let location = queries::get_location(conn, tenant_id, location_id)?
        .ok_or_else(|| AppError::NotFound(format!("location {location_id}")))?;
    if !location.active {
        return Err(AppError::Validation(format!(
            "location {location_id} is not taking bookings"
        )));
    }

    Ok(ValidatedRequest {
        date,
        time,
        selection: StaffSelection::parse(&req.staff_id),
        customer,
        location_id: location.id,
        service_id: req.service_id.trim().to_string(),
    })
}

/// Re-derives availability for the chosen time and resolves the staff
/// member who will take it.
fn resolve_slot(
    conn: &Connection,
    tenant_id: &str,
    req: &ValidatedRequest,
    policy: AssignmentPolicy,
    now: NaiveDateTime,
) -> Result<(Service, String), AppError> {
    let snapshot = DaySnapshot::load(conn, tenant_id, &req.service_id, req.date)?;
    let slots = snapshot.slots(&req.selection, now)?;

    let slot = slots.iter().find(|s| s.time == req.time).ok_or_else(|| {
        AppError::Validation(format!(
            "{} is not a bookable time for this service on {}",
            format_time(&req.time),
            format_date(&req.date)
        ))
    })?;

    if !slot.free {
        return Err(AppError::SlotConflict(format!(
            "{} on {} is no longer available",
            format_time(&req.time),
            format_date(&req.date)
        )));
    }

    let staff_id = match &req.selection {
        StaffSelection::Specific(id) => id.clone(),
        StaffSelection::Any => {
            let last_booked = match policy {
                AssignmentPolicy::LeastRecentlyBooked => queries::get_last_booked_at(conn, tenant_id)?,
                AssignmentPolicy::FirstById => Default::default(),
            };
            pick_staff(&slot.eligible_staff_ids, policy, &last_booked)
                .cloned()
                .ok_or_else(|| AppError::SlotConflict("no staff member is free then".into()))?
        }
    };

    Ok((snapshot.service, staff_id))
}

fn build_booking(
    tenant_id: &str,
    req: &ValidatedRequest,
    service: &Service,
    staff_id: String,
    status: BookingStatus,
    payment: &PaymentAttempt,
) -> Booking {
    let now = Utc::now().naive_utc();
    let funds_moved = payment.amount_cents > 0;
    Booking {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        service_id: service.id.clone(),
        staff_id,
        location_id: req.location_id.clone(),
        customer_name: req.customer.name.clone(),
        customer_email: req.customer.email.clone(),
        customer_phone: req.customer.phone.clone(),
        booking_date: req.date,
        booking_time: req.time,
        duration_minutes: service.duration_minutes,
        status,
        total_price_cents: service.price_cents,
        payment_provider: funds_moved.then(|| payment.provider.clone()),
        payment_reference: funds_moved.then(|| payment.correlation_id.clone()),
        cancel_token: generate_cancel_token(),
        created_at: now,
        updated_at: now,
    }
}

/// Records money that has no booking behind it. If even that write fails
/// the full payload goes to the error log.
fn escalate(state: &AppState, tenant_id: &str, payment: &PaymentAttempt, reason: &str, payload: String) {
    let item = ReconciliationItem {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        provider: payment.provider.clone(),
        reference: payment.correlation_id.clone(),
        amount_cents: payment.amount_cents,
        reason: reason.to_string(),
        payload,
        created_at: Utc::now().naive_utc(),
    };

    tracing::error!(
        tenant_id,
        provider = %item.provider,
        reference = %item.reference,
        amount_cents = item.amount_cents,
        reason,
        "payment requires manual reconciliation"
    );

    let result = {
        let db = state.db();
        queries::insert_reconciliation_item(&db, &item)
    };
    if let Err(e) = result {
        tracing::error!(
            error = %e,
            item = %serde_json::to_string(&item).unwrap_or_default(),
            "failed to record reconciliation item"
        );
    }
}

/// Writes the booking, retrying store failures with backoff. A lost race
/// is never retried.
async fn persist(
    state: &AppState,
    booking: Booking,
    payment: &PaymentAttempt,
) -> Result<Booking, AppError> {
    let policy = RetryPolicy::persistence(state.config.persist_retry_attempts);
    let result = policy
        .retry_async(|attempt| {
            if attempt > 0 {
                tracing::warn!(booking_id = %booking.id, attempt, "retrying booking write");
            }
            let result = {
                let db = state.db();
                queries::insert_booking(&db, &booking)
            };
            std::future::ready(result)
        })
        .await;

    let funds_moved = payment.amount_cents > 0;

    match result {
        Ok(InsertOutcome::Inserted) => Ok(booking),
        Ok(InsertOutcome::DuplicatePayment) => {
            let existing = {
                let db = state.db();
                queries::get_booking_by_payment_reference(&db, &payment.correlation_id)?
            };
            existing.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "duplicate payment reference {} but no booking found",
                    payment.correlation_id
                ))
            })
        }
        Ok(InsertOutcome::SlotTaken) => {
            if funds_moved {
                escalate(
                    state,
                    &booking.tenant_id,
                    payment,
                    "slot taken after payment",
                    serde_json::to_string(&booking).unwrap_or_default(),
                );
            }
            Err(AppError::SlotConflict(format!(
                "{} on {} was just taken",
                format_time(&booking.booking_time),
                format_date(&booking.booking_date)
            )))
        }
        Err(e) => {
            if funds_moved {
                escalate(
                    state,
                    &booking.tenant_id,
                    payment,
                    &format!("booking write failed: {e}"),
                    serde_json::to_string(&booking).unwrap_or_default(),
                );
            }
            Err(AppError::Persistence(format!("could not save booking: {e}")))
        }
    }
}

/// Validates, re-checks and pays for a slot, then writes the booking.
/// Mobile-money requests come back as `AwaitingPayment` with no booking
/// written; finish them with [`confirm_async_payment`].
pub async fn create_booking(
    state: &AppState,
    tenant_id: &str,
    req: &BookingRequest,
) -> Result<BookingOutcome, AppError> {
    let mut attempt = BookingAttempt::new(tenant_id);
    attempt.advance(AttemptPhase::Validating)?;

    let now = Utc::now().naive_utc();
    let confirmation =
        payment::confirmation_for(&req.payment_plan, state).map_err(|e| attempt.reject(e))?;
    let (validated, service, staff_id) = {
        let db = state.db();
        validate_request(&db, tenant_id, req)
            .and_then(|v| {
                resolve_slot(&db, tenant_id, &v, state.config.staff_assignment, now)
                    .map(|(service, staff)| (v, service, staff))
            })
            .map_err(|e| attempt.reject(e))?
    };

    attempt.advance(AttemptPhase::AwaitingPayment)?;
    let payment_request = PaymentRequest {
        amount_cents: service.price_cents,
        currency: state.config.currency.clone(),
        reference: Uuid::new_v4().to_string(),
    };

    let paid = match confirmation.secure(&payment_request).await {
        PaymentOutcome::Secured(paid) => paid,
        PaymentOutcome::Declined { provider, reason } => {
            tracing::info!(tenant_id, provider = %provider, reason = %reason, "payment declined");
            return Err(attempt.reject(AppError::PaymentFailed(reason)));
        }
        PaymentOutcome::Deferred(pending) => {
            return park_for_payment(state, tenant_id, req, pending).map(BookingOutcome::AwaitingPayment);
        }
    };

    attempt.advance(AttemptPhase::PaymentSucceeded)?;
    attempt.advance(AttemptPhase::Persisting)?;

    let status = match req.payment_plan {
        PaymentPlan::PayAtVenue => state.config.pay_at_venue_status,
        PaymentPlan::Card { .. } | PaymentPlan::MobileMoney { .. } => BookingStatus::Confirmed,
    };
    let booking = build_booking(tenant_id, &validated, &service, staff_id, status, &paid);
    let booking = persist(state, booking, &paid)
        .await
        .map_err(|e| attempt.reject(e))?;

    attempt.advance(AttemptPhase::Confirmed)?;
    tracing::info!(
        tenant_id,
        booking_id = %booking.id,
        staff_id = %booking.staff_id,
        date = %format_date(&booking.booking_date),
        time = %format_time(&booking.booking_time),
        status = booking.status.as_str(),
        "booking confirmed"
    );

    let receipt = BookingReceipt::from(&booking);
    events::publish(state, BookingEvent::Confirmed(booking));
    Ok(BookingOutcome::Booked(receipt))
}

fn park_for_payment(
    state: &AppState,
    tenant_id: &str,
    req: &BookingRequest,
    attempt: PaymentAttempt,
) -> Result<AwaitingPayment, AppError> {
    let now = Utc::now().naive_utc();
    let pending = PendingPayment {
        correlation_id: attempt.correlation_id.clone(),
        tenant_id: tenant_id.to_string(),
        request: req.clone(),
        provider: attempt.provider.clone(),
        amount_cents: attempt.amount_cents,
        currency: state.config.currency.clone(),
        status: PendingPaymentStatus::Pending,
        provider_status: None,
        booking_id: None,
        created_at: now,
        expires_at: now + Duration::seconds(state.config.payment_timeout_secs),
        settling_since: None,
    };

    let result = {
        let db = state.db();
        queries::insert_pending_payment(&db, &pending)
    };
    if let Err(e) = result {
        tracing::error!(
            error = %e,
            correlation_id = %attempt.correlation_id,
            request = %serde_json::to_string(req).unwrap_or_default(),
            "failed to park booking awaiting mobile money payment"
        );
        return Err(AppError::Internal(e));
    }

    tracing::info!(
        tenant_id,
        correlation_id = %pending.correlation_id,
        expires_at = %pending.expires_at,
        "booking awaiting mobile money payment"
    );

    Ok(AwaitingPayment {
        correlation_id: pending.correlation_id,
        provider: pending.provider,
        expires_at: pending.expires_at,
    })
}

fn load_pending(state: &AppState, correlation_id: &str) -> Result<PendingPayment, AppError> {
    let db = state.db();
    queries::get_pending_payment(&db, correlation_id)?
        .ok_or_else(|| AppError::NotFound(format!("payment {correlation_id}")))
}

fn move_pending(
    state: &AppState,
    correlation_id: &str,
    from: PendingPaymentStatus,
    to: PendingPaymentStatus,
    booking_id: Option<&str>,
) -> Result<bool, AppError> {
    let db = state.db();
    Ok(queries::transition_pending_payment(
        &db,
        correlation_id,
        from,
        to,
        booking_id,
    )?)
}

fn receipt_for(state: &AppState, booking_id: Option<&str>) -> Result<Option<BookingReceipt>, AppError> {
    let Some(id) = booking_id else {
        return Ok(None);
    };
    let db = state.db();
    Ok(queries::get_booking_by_id(&db, id)?.as_ref().map(BookingReceipt::from))
}

/// What the provider says, preferring a webhook-recorded terminal status
/// over a fresh poll. Poll errors and timeouts count as still pending.
async fn provider_outcome(state: &AppState, pending: &PendingPayment) -> AttemptOutcome {
    if let Some(outcome) = pending.provider_status {
        if outcome != AttemptOutcome::Pending {
            return outcome;
        }
    }
    let Some(provider) = state.mobile_money.as_deref() else {
        return AttemptOutcome::Pending;
    };
    let polled = tokio::time::timeout(
        state.config.provider_timeout(),
        provider.poll(&pending.correlation_id),
    )
    .await;
    match polled {
        Ok(Ok(outcome)) => {
            if outcome == AttemptOutcome::Pending {
                return outcome;
            }
            let db = state.db();
            match queries::record_provider_status(&db, &pending.correlation_id, outcome) {
                // A terminal status recorded meanwhile wins over this poll
                Ok(Some(stored)) => stored,
                Ok(None) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to record polled payment status");
                    outcome
                }
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, correlation_id = %pending.correlation_id, "payment status poll failed");
            AttemptOutcome::Pending
        }
        Err(_) => {
            tracing::warn!(correlation_id = %pending.correlation_id, "payment status poll timed out");
            AttemptOutcome::Pending
        }
    }
}

/// How long a `settling` claim may sit without a booking before it is
/// considered abandoned.
fn settlement_lease(state: &AppState) -> Duration {
    let policy = RetryPolicy::persistence(state.config.persist_retry_attempts);
    // Capped at a day so absurd retry settings cannot overflow the clock math
    let retries_ms = policy
        .max_delay_ms
        .saturating_mul(policy.max_attempts as u64)
        .min(86_400_000);
    Duration::milliseconds(retries_ms as i64) + Duration::seconds(SETTLEMENT_GRACE_SECS)
}

fn pending_attempt(pending: &PendingPayment) -> PaymentAttempt {
    PaymentAttempt {
        provider: pending.provider.clone(),
        amount_cents: pending.amount_cents,
        correlation_id: pending.correlation_id.clone(),
        outcome: AttemptOutcome::Succeeded,
    }
}

/// Checks an outstanding mobile-money payment and, once it has succeeded,
/// writes the booking. Safe to call any number of times for the same
/// correlation id: at most one booking is ever created for it, and never
/// after the payment window expired or the customer abandoned the flow.
pub async fn confirm_async_payment(
    state: &AppState,
    correlation_id: &str,
) -> Result<AsyncPaymentStatus, AppError> {
    let pending = load_pending(state, correlation_id)?;

    match pending.status {
        PendingPaymentStatus::Booked => {
            let receipt = receipt_for(state, pending.booking_id.as_deref())?;
            return Ok(AsyncPaymentStatus::paid(PendingPaymentStatus::Booked, receipt));
        }
        PendingPaymentStatus::Failed => {
            return Ok(AsyncPaymentStatus::unpaid(PendingPaymentStatus::Failed));
        }
        PendingPaymentStatus::NeedsReconciliation => {
            return Ok(AsyncPaymentStatus::paid(PendingPaymentStatus::NeedsReconciliation, None));
        }
        PendingPaymentStatus::Settling => {
            // Another caller is writing the booking, or crashed after writing it
            let existing = {
                let db = state.db();
                queries::get_booking_by_payment_reference(&db, correlation_id)?
            };
            if let Some(booking) = existing {
                move_pending(
                    state,
                    correlation_id,
                    PendingPaymentStatus::Settling,
                    PendingPaymentStatus::Booked,
                    Some(&booking.id),
                )?;
                return Ok(AsyncPaymentStatus::paid(
                    PendingPaymentStatus::Booked,
                    Some(BookingReceipt::from(&booking)),
                ));
            }
            let stale_before = Utc::now().naive_utc() - settlement_lease(state);
            let reclaimed = {
                let db = state.db();
                queries::reclaim_settlement(&db, correlation_id, &stale_before)?
            };
            if reclaimed {
                tracing::warn!(
                    correlation_id,
                    settling_since = ?pending.settling_since,
                    "taking over abandoned settlement"
                );
                return place_paid_booking(state, &pending).await;
            }
            return Ok(AsyncPaymentStatus::paid(PendingPaymentStatus::Settling, None));
        }
        PendingPaymentStatus::Expired | PendingPaymentStatus::Abandoned => {
            if provider_outcome(state, &pending).await == AttemptOutcome::Succeeded {
                if move_pending(
                    state,
                    correlation_id,
                    pending.status,
                    PendingPaymentStatus::NeedsReconciliation,
                    None,
                )? {
                    escalate(
                        state,
                        &pending.tenant_id,
                        &pending_attempt(&pending),
                        "payment succeeded after booking window closed",
                        serde_json::to_string(&pending.request).unwrap_or_default(),
                    );
                }
                return Ok(AsyncPaymentStatus::paid(PendingPaymentStatus::NeedsReconciliation, None));
            }
            return Ok(AsyncPaymentStatus::unpaid(pending.status));
        }
        PendingPaymentStatus::Pending => {}
    }

    let outcome = provider_outcome(state, &pending).await;
    let expired = Utc::now().naive_utc() > pending.expires_at;

    match (outcome, expired) {
        (AttemptOutcome::Pending, false) => Ok(AsyncPaymentStatus::unpaid(PendingPaymentStatus::Pending)),
        (AttemptOutcome::Pending, true) => {
            move_pending(
                state,
                correlation_id,
                PendingPaymentStatus::Pending,
                PendingPaymentStatus::Expired,
                None,
            )?;
            tracing::info!(correlation_id, "mobile money payment window expired");
            Ok(AsyncPaymentStatus::unpaid(PendingPaymentStatus::Expired))
        }
        (AttemptOutcome::Failed, _) => {
            move_pending(
                state,
                correlation_id,
                PendingPaymentStatus::Pending,
                PendingPaymentStatus::Failed,
                None,
            )?;
            tracing::info!(correlation_id, "mobile money payment failed");
            Ok(AsyncPaymentStatus::unpaid(PendingPaymentStatus::Failed))
        }
        (AttemptOutcome::Succeeded, true) => {
            if move_pending(
                state,
                correlation_id,
                PendingPaymentStatus::Pending,
                PendingPaymentStatus::NeedsReconciliation,
                None,
            )? {
                escalate(
                    state,
                    &pending.tenant_id,
                    &pending_attempt(&pending),
                    "payment succeeded after booking window closed",
                    serde_json::to_string(&pending.request).unwrap_or_default(),
                );
            }
            Ok(AsyncPaymentStatus::paid(PendingPaymentStatus::NeedsReconciliation, None))
        }
        (AttemptOutcome::Succeeded, false) => settle(state, &pending).await,
    }
}

/// Turns a succeeded async payment into a booking. Only the caller that
/// wins the `pending → settling` claim gets to write.
async fn settle(state: &AppState, pending: &PendingPayment) -> Result<AsyncPaymentStatus, AppError> {
    let correlation_id = pending.correlation_id.as_str();
    if !move_pending(
        state,
        correlation_id,
        PendingPaymentStatus::Pending,
        PendingPaymentStatus::Settling,
        None,
    )? {
        let current = load_pending(state, correlation_id)?;
        let receipt = receipt_for(state, current.booking_id.as_deref())?;
        return Ok(AsyncPaymentStatus {
            paid: current.status != PendingPaymentStatus::Failed,
            status: current.status,
            booking: receipt,
        });
    }

    place_paid_booking(state, pending).await
}

/// Writes the booking for a payment this caller holds the `settling` claim
/// on. Every failure leaves a reconciliation item behind before the claim
/// is released.
async fn place_paid_booking(
    state: &AppState,
    pending: &PendingPayment,
) -> Result<AsyncPaymentStatus, AppError> {
    let correlation_id = pending.correlation_id.as_str();
    let mut attempt = BookingAttempt::resume_awaiting_payment(&pending.tenant_id);
    let paid = pending_attempt(pending);
    let now = Utc::now().naive_utc();

    let resolved = {
        let db = state.db();
        validate_request(&db, &pending.tenant_id, &pending.request).and_then(|v| {
            resolve_slot(&db, &pending.tenant_id, &v, state.config.staff_assignment, now)
                .map(|(service, staff)| (v, service, staff))
        })
    };

    let (validated, service, staff_id) = match resolved {
        Ok(r) => r,
        Err(e) => {
            // Paid, but the slot (or the service) is gone
            attempt.advance(AttemptPhase::PaymentSucceeded)?;
            attempt.advance(AttemptPhase::Persisting)?;
            let e = attempt.reject(e);
            escalate(
                state,
                &pending.tenant_id,
                &paid,
                &format!("paid booking could not be placed: {e}"),
                serde_json::to_string(&pending.request).unwrap_or_default(),
            );
            move_pending(
                state,
                correlation_id,
                PendingPaymentStatus::Settling,
                PendingPaymentStatus::NeedsReconciliation,
                None,
            )?;
            return Ok(AsyncPaymentStatus::paid(PendingPaymentStatus::NeedsReconciliation, None));
        }
    };

    attempt.advance(AttemptPhase::PaymentSucceeded)?;
    attempt.advance(AttemptPhase::Persisting)?;

    let booking = build_booking(
        &pending.tenant_id,
        &validated,
        &service,
        staff_id,
        BookingStatus::Confirmed,
        &paid,
    );

    // `persist` escalates paid failures itself, so the claim can be released
    let booking = match persist(state, booking, &paid).await {
        Ok(booking) => booking,
        Err(e) => {
            let e = attempt.reject(e);
            move_pending(
                state,
                correlation_id,
                PendingPaymentStatus::Settling,
                PendingPaymentStatus::NeedsReconciliation,
                None,
            )?;
            return match e {
                AppError::SlotConflict(_) => Ok(AsyncPaymentStatus::paid(
                    PendingPaymentStatus::NeedsReconciliation,
                    None,
                )),
                other => Err(other),
            };
        }
    };

    attempt.advance(AttemptPhase::Confirmed)?;
    move_pending(
        state,
        correlation_id,
        PendingPaymentStatus::Settling,
        PendingPaymentStatus::Booked,
        Some(&booking.id),
    )?;
    tracing::info!(
        tenant_id = %booking.tenant_id,
        booking_id = %booking.id,
        correlation_id,
        staff_id = %booking.staff_id,
        "booking confirmed after mobile money payment"
    );

    let receipt = BookingReceipt::from(&booking);
    events::publish(state, BookingEvent::Confirmed(booking));
    Ok(AsyncPaymentStatus::paid(PendingPaymentStatus::Booked, Some(receipt)))
}

/// Polls until the payment leaves `pending`, the attempt budget is spent,
/// or the payment window closes (the final confirm then marks it expired).
pub async fn await_async_payment(
    state: &AppState,
    correlation_id: &str,
    policy: &RetryPolicy,
) -> Result<AsyncPaymentStatus, AppError> {
    let mut attempt = 0;
    loop {
        let status = confirm_async_payment(state, correlation_id).await?;
        if status.status != PendingPaymentStatus::Pending {
            return Ok(status);
        }
        attempt += 1;
        if attempt >= policy.max_attempts {
            return Ok(status);
        }
        tokio::time::sleep(policy.delay_for(attempt - 1)).await;
    }
}

/// Customer walked away. A late success is never booked.
pub fn abandon_async_payment(state: &AppState, correlation_id: &str) -> Result<PendingPaymentStatus, AppError> {
    let pending = load_pending(state, correlation_id)?;
    match pending.status {
        PendingPaymentStatus::Pending => {
            if move_pending(
                state,
                correlation_id,
                PendingPaymentStatus::Pending,
                PendingPaymentStatus::Abandoned,
                None,
            )? {
                tracing::info!(correlation_id, "mobile money payment abandoned");
                return Ok(PendingPaymentStatus::Abandoned);
            }
            // Lost a race with settlement; report whatever won
            Ok(load_pending(state, correlation_id)?.status)
        }
        PendingPaymentStatus::Booked | PendingPaymentStatus::Settling => Err(AppError::InvalidTransition(
            format!("payment {correlation_id} has already been settled"),
        )),
        other => Ok(other),
    }
}

/// Records a provider callback and settles if the outcome is final.
pub async fn record_provider_callback(
    state: &AppState,
    correlation_id: &str,
    outcome: AttemptOutcome,
) -> Result<AsyncPaymentStatus, AppError> {
    let stored = {
        let db = state.db();
        queries::record_provider_status(&db, correlation_id, outcome)?
    };
    match stored {
        None => return Err(AppError::NotFound(format!("payment {correlation_id}"))),
        Some(stored) if stored != outcome => {
            tracing::warn!(
                correlation_id,
                reported = outcome.as_str(),
                kept = stored.as_str(),
                "provider callback contradicts recorded outcome"
            );
        }
        Some(_) => {}
    }
    confirm_async_payment(state, correlation_id).await
}

/// Cancels by cancel token. Cancelling twice succeeds both times; a token
/// whose appointment has already started is treated as unknown.
pub fn cancel_booking(state: &AppState, token: &str) -> Result<Booking, AppError> {
    let now = Utc::now().naive_utc();
    let db = state.db();
    let booking = queries::get_booking_by_cancel_token(&db, token.trim())?
        .ok_or_else(|| AppError::NotFound("booking for cancel token".into()))?;

    if booking.status == BookingStatus::Cancelled {
        return Ok(booking);
    }
    if booking.starts_at() <= now {
        return Err(AppError::NotFound("cancel token has expired".into()));
    }
    if !booking.status.can_transition_to(BookingStatus::Cancelled) {
        return Err(AppError::InvalidTransition(format!(
            "a {} booking cannot be cancelled",
            booking.status.as_str()
        )));
    }

    if !queries::transition_booking_status(&db, &booking.id, booking.status, BookingStatus::Cancelled)? {
        // Someone changed it under us; accept only if they also cancelled
        let current = queries::get_booking_by_id(&db, &booking.id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {}", booking.id)))?;
        if current.status != BookingStatus::Cancelled {
            return Err(AppError::InvalidTransition(format!(
                "booking is now {}",
                current.status.as_str()
            )));
        }
        return Ok(current);
    }
    drop(db);

    tracing::info!(booking_id = %booking.id, tenant_id = %booking.tenant_id, "booking cancelled");
    let cancelled = Booking {
        status: BookingStatus::Cancelled,
        updated_at: now,
        ..booking
    };
    events::publish(state, BookingEvent::Cancelled(cancelled.clone()));
    Ok(cancelled)
}

/// Staff-side status change (confirm a pending request, mark a no-show).
pub fn set_booking_status(state: &AppState, booking_id: &str, next: BookingStatus) -> Result<Booking, AppError> {
    let db = state.db();
    let booking = queries::get_booking_by_id(&db, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

    if booking.status == next {
        return Ok(booking);
    }
    if !booking.status.can_transition_to(next)
        || !queries::transition_booking_status(&db, booking_id, booking.status, next)?
    {
        return Err(AppError::InvalidTransition(format!(
            "{} -> {}",
            booking.status.as_str(),
            next.as_str()
        )));
    }

    tracing::info!(booking_id, from = booking.status.as_str(), to = next.as_str(), "booking status changed");
    Ok(Booking {
        status: next,
        updated_at: Utc::now().naive_utc(),
        ..booking
    })
}
