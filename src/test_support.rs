//! Fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::db::{self, queries};
use crate::models::availability::{parse_date, parse_time};
use crate::models::{
    AttemptOutcome, Booking, BookingStatus, Location, Service, StaffMember, WeeklyAvailability,
};
use crate::services::availability::AssignmentPolicy;
use crate::services::payment::{CaptureRequest, CardProcessor, MobileMoneyProvider, PushRequest};
use crate::state::AppState;

pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

pub fn haircut() -> Service {
    Service {
        id: "cut".to_string(),
        tenant_id: "t1".to_string(),
        name: "Haircut".to_string(),
        category: "hair".to_string(),
        duration_minutes: 60,
        price_cents: 2500,
        active: true,
    }
}

pub fn staff(id: &str, category: &str) -> StaffMember {
    StaffMember {
        id: id.to_string(),
        tenant_id: "t1".to_string(),
        name: id.to_uppercase(),
        category: category.to_string(),
        active: true,
    }
}

pub fn monday_window(staff_id: &str, start: &str, end: &str) -> WeeklyAvailability {
    WeeklyAvailability {
        staff_id: staff_id.to_string(),
        day_of_week: 1,
        start_time: parse_time(start).unwrap(),
        end_time: parse_time(end).unwrap(),
        is_available: true,
    }
}

/// Tenant `t1`: service `cut` (hair, 60 min), hair staff `s1` and `s2`
/// working Mondays 09:00-17:00, nail staff `s3`, location `loc1`.
pub fn seed_salon(conn: &Connection) {
    queries::save_service(conn, &haircut()).unwrap();
    for s in [staff("s1", "hair"), staff("s2", "hair"), staff("s3", "nails")] {
        queries::save_staff(conn, &s).unwrap();
    }
    queries::save_location(
        conn,
        &Location {
            id: "loc1".to_string(),
            tenant_id: "t1".to_string(),
            name: "Main Street".to_string(),
            active: true,
        },
    )
    .unwrap();
    for id in ["s1", "s2", "s3"] {
        queries::add_weekly_availability(conn, &monday_window(id, "09:00", "17:00")).unwrap();
    }
}

pub fn booking_at(id: &str, staff_id: &str, date: &str, time: &str) -> Booking {
    let now = ts("2030-01-01 12:00");
    Booking {
        id: id.to_string(),
        tenant_id: "t1".to_string(),
        service_id: "cut".to_string(),
        staff_id: staff_id.to_string(),
        location_id: "loc1".to_string(),
        customer_name: "Alice".to_string(),
        customer_email: Some("alice@example.com".to_string()),
        customer_phone: None,
        booking_date: parse_date(date).unwrap(),
        booking_time: parse_time(time).unwrap(),
        duration_minutes: 60,
        status: BookingStatus::Confirmed,
        total_price_cents: 2500,
        payment_provider: None,
        payment_reference: None,
        cancel_token: format!("tok-{id}"),
        created_at: now,
        updated_at: now,
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        currency: "USD".to_string(),
        pay_at_venue_status: BookingStatus::Confirmed,
        staff_assignment: AssignmentPolicy::FirstById,
        card_processor_url: String::new(),
        card_processor_key: String::new(),
        mobile_money_url: String::new(),
        mobile_money_key: String::new(),
        payment_webhook_secret: String::new(),
        payment_timeout_secs: 120,
        persist_retry_attempts: 3,
        provider_timeout_ms: 5_000,
    }
}

/// Seeded salon state with the given payment providers wired in.
pub fn test_state_with(
    config: AppConfig,
    card: Option<MockCard>,
    mobile: Option<MockMobileMoney>,
) -> Arc<AppState> {
    let conn = db::init_db(":memory:").unwrap();
    seed_salon(&conn);
    let (events_tx, _) = broadcast::channel(16);
    Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        card_processor: card.map(|c| Box::new(c) as Box<dyn CardProcessor>),
        mobile_money: mobile.map(|m| Box::new(m) as Box<dyn MobileMoneyProvider>),
        events_tx,
    })
}

pub fn test_state(card: Option<MockCard>, mobile: Option<MockMobileMoney>) -> Arc<AppState> {
    test_state_with(test_config(), card, mobile)
}

#[derive(Clone)]
pub struct MockCard {
    outcome: AttemptOutcome,
    calls: Arc<AtomicUsize>,
    yields: bool,
    hangs: bool,
}

impl MockCard {
    pub fn new(outcome: AttemptOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
            yields: false,
            hangs: false,
        }
    }

    /// Gives other tasks a turn before answering, so attempts joined on the
    /// same task interleave between slot check and write.
    pub fn yielding(outcome: AttemptOutcome) -> Self {
        Self {
            yields: true,
            ..Self::new(outcome)
        }
    }

    /// Never answers.
    pub fn unresponsive() -> Self {
        Self {
            hangs: true,
            ..Self::new(AttemptOutcome::Succeeded)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CardProcessor for MockCard {
    fn name(&self) -> &str {
        "mock_card"
    }

    async fn capture(&self, _request: &CaptureRequest) -> anyhow::Result<AttemptOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hangs {
            std::future::pending::<()>().await;
        }
        if self.yields {
            tokio::task::yield_now().await;
        }
        Ok(self.outcome)
    }
}

/// Replies to polls from a script; once it runs dry every poll is pending.
#[derive(Clone)]
pub struct MockMobileMoney {
    script: Arc<Mutex<VecDeque<AttemptOutcome>>>,
    initiated: Arc<AtomicUsize>,
    polls: Arc<AtomicUsize>,
    hang_initiate: bool,
    hang_poll: bool,
}

impl MockMobileMoney {
    pub fn new(script: Vec<AttemptOutcome>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            initiated: Arc::new(AtomicUsize::new(0)),
            polls: Arc::new(AtomicUsize::new(0)),
            hang_initiate: false,
            hang_poll: false,
        }
    }

    /// Neither push nor status calls ever answer.
    pub fn unresponsive() -> Self {
        Self {
            hang_initiate: true,
            hang_poll: true,
            ..Self::new(vec![])
        }
    }

    /// Accepts pushes but never answers a status poll.
    pub fn silent_polls() -> Self {
        Self {
            hang_poll: true,
            ..Self::new(vec![])
        }
    }

    pub fn initiated(&self) -> usize {
        self.initiated.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MobileMoneyProvider for MockMobileMoney {
    fn name(&self) -> &str {
        "mock_mobile_money"
    }

    async fn initiate(&self, _request: &PushRequest) -> anyhow::Result<String> {
        let n = self.initiated.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_initiate {
            std::future::pending::<()>().await;
        }
        Ok(format!("mm-{n}"))
    }

    async fn poll(&self, _correlation_id: &str) -> anyhow::Result<AttemptOutcome> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.hang_poll {
            std::future::pending::<()>().await;
        }
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AttemptOutcome::Pending))
    }
}
