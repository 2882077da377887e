use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::booking::Customer;

/// How the customer intends to pay for a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentPlan {
    PayAtVenue,
    /// Card or wallet; `source_token` is the client-side tokenized instrument.
    Card { source_token: String },
    MobileMoney { phone: String },
}

/// The body of a booking request. Kept as raw strings so malformed values
/// surface as validation errors rather than extractor rejections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub service_id: String,
    #[serde(default = "auto_staff")]
    pub staff_id: String,
    pub location_id: String,
    pub date: String,
    pub time: String,
    pub customer: Customer,
    #[serde(default = "pay_at_venue")]
    pub payment_plan: PaymentPlan,
}

fn auto_staff() -> String {
    "auto".to_string()
}

fn pay_at_venue() -> PaymentPlan {
    PaymentPlan::PayAtVenue
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "pending",
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Failed => "failed",
        }
    }

    /// Accepts the spellings mobile-money providers commonly report.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" | "processing" | "initiated" => Some(AttemptOutcome::Pending),
            "succeeded" | "success" | "successful" | "completed" | "paid" => {
                Some(AttemptOutcome::Succeeded)
            }
            "failed" | "declined" | "cancelled" | "rejected" | "expired" => {
                Some(AttemptOutcome::Failed)
            }
            _ => None,
        }
    }
}

/// One payment attempt as seen by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub provider: String,
    pub amount_cents: i64,
    pub correlation_id: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingPaymentStatus {
    Pending,
    Settling,
    Booked,
    Failed,
    Expired,
    Abandoned,
    NeedsReconciliation,
}

impl PendingPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingPaymentStatus::Pending => "pending",
            PendingPaymentStatus::Settling => "settling",
            PendingPaymentStatus::Booked => "booked",
            PendingPaymentStatus::Failed => "failed",
            PendingPaymentStatus::Expired => "expired",
            PendingPaymentStatus::Abandoned => "abandoned",
            PendingPaymentStatus::NeedsReconciliation => "needs_reconciliation",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "settling" => PendingPaymentStatus::Settling,
            "booked" => PendingPaymentStatus::Booked,
            "failed" => PendingPaymentStatus::Failed,
            "expired" => PendingPaymentStatus::Expired,
            "abandoned" => PendingPaymentStatus::Abandoned,
            "needs_reconciliation" => PendingPaymentStatus::NeedsReconciliation,
            _ => PendingPaymentStatus::Pending,
        }
    }
}

/// A booking request parked while an asynchronous payment is outstanding.
/// It never occupies a slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayment {
    pub correlation_id: String,
    pub tenant_id: String,
    pub request: BookingRequest,
    pub provider: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PendingPaymentStatus,
    pub provider_status: Option<AttemptOutcome>,
    pub booking_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    /// Set when a caller claims the payment for settlement.
    pub settling_since: Option<NaiveDateTime>,
}

/// Money that moved without a booking to show for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub id: String,
    pub tenant_id: String,
    pub provider: String,
    pub reference: String,
    pub amount_cents: i64,
    pub reason: String,
    pub payload: String,
    pub created_at: NaiveDateTime,
}
