use std::env;
use std::time::Duration;

use crate::models::BookingStatus;
use crate::services::availability::AssignmentPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub currency: String,
    pub pay_at_venue_status: BookingStatus,
    pub staff_assignment: AssignmentPolicy,
    pub card_processor_url: String,
    pub card_processor_key: String,
    pub mobile_money_url: String,
    pub mobile_money_key: String,
    pub payment_webhook_secret: String,
    pub payment_timeout_secs: i64,
    pub persist_retry_attempts: usize,
    /// Upper bound on any single call to a payment provider.
    pub provider_timeout_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "slotbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            // Only "pending" changes the default; anything else confirms directly.
            pay_at_venue_status: match env::var("PAY_AT_VENUE_STATUS").as_deref() {
                Ok("pending") => BookingStatus::Pending,
                _ => BookingStatus::Confirmed,
            },
            staff_assignment: env::var("STAFF_ASSIGNMENT")
                .map(|v| AssignmentPolicy::parse(&v))
                .unwrap_or_default(),
            card_processor_url: env::var("CARD_PROCESSOR_URL").unwrap_or_default(),
            card_processor_key: env::var("CARD_PROCESSOR_KEY").unwrap_or_default(),
            mobile_money_url: env::var("MOBILE_MONEY_URL").unwrap_or_default(),
            mobile_money_key: env::var("MOBILE_MONEY_KEY").unwrap_or_default(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            payment_timeout_secs: env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            persist_retry_attempts: env::var("PERSIST_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            provider_timeout_ms: env::var("PROVIDER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms.max(1))
    }
}
