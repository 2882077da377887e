pub mod card;
pub mod mobile_money;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{AttemptOutcome, PaymentAttempt, PaymentPlan};
use crate::state::AppState;

pub const NO_PAYMENT_PROVIDER: &str = "none";

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub correlation_ref: String,
    pub source_token: String,
}

/// Synchronous card or wallet capture.
#[async_trait]
pub trait CardProcessor: Send + Sync {
    fn name(&self) -> &str;
    async fn capture(&self, request: &CaptureRequest) -> anyhow::Result<AttemptOutcome>;
}

#[derive(Debug, Clone)]
pub struct PushRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub phone: String,
    pub reference: String,
}

/// Asynchronous mobile-money push: `initiate` sends the prompt to the
/// customer's phone, `poll` reports how it went.
#[async_trait]
pub trait MobileMoneyProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn initiate(&self, request: &PushRequest) -> anyhow::Result<String>;
    async fn poll(&self, correlation_id: &str) -> anyhow::Result<AttemptOutcome>;
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub reference: String,
}

#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// Funds are secured (or none were needed); the booking may be written.
    Secured(PaymentAttempt),
    Declined { provider: String, reason: String },
    /// The customer still has to approve; poll `attempt.correlation_id`.
    Deferred(PaymentAttempt),
}

/// The one capability the booking coordinator depends on.
#[async_trait]
pub trait PaymentConfirmation: Send + Sync {
    async fn secure(&self, request: &PaymentRequest) -> PaymentOutcome;
}

pub struct NoPaymentRequired;

#[async_trait]
impl PaymentConfirmation for NoPaymentRequired {
    async fn secure(&self, request: &PaymentRequest) -> PaymentOutcome {
        PaymentOutcome::Secured(PaymentAttempt {
            provider: NO_PAYMENT_PROVIDER.to_string(),
            amount_cents: 0,
            correlation_id: request.reference.clone(),
            outcome: AttemptOutcome::Succeeded,
        })
    }
}

pub struct SynchronousCapture<'a> {
    processor: &'a dyn CardProcessor,
    source_token: String,
    timeout: Duration,
}

#[async_trait]
impl PaymentConfirmation for SynchronousCapture<'_> {
    async fn secure(&self, request: &PaymentRequest) -> PaymentOutcome {
        let provider = self.processor.name().to_string();
        let capture = CaptureRequest {
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
            correlation_ref: request.reference.clone(),
            source_token: self.source_token.clone(),
        };

        let result = tokio::time::timeout(self.timeout, self.processor.capture(&capture)).await;
        let reason = match result {
            Ok(Ok(AttemptOutcome::Succeeded)) => {
                return PaymentOutcome::Secured(PaymentAttempt {
                    provider,
                    amount_cents: request.amount_cents,
                    correlation_id: request.reference.clone(),
                    outcome: AttemptOutcome::Succeeded,
                });
            }
            Ok(Ok(AttemptOutcome::Failed)) => "card was declined".to_string(),
            Ok(Ok(AttemptOutcome::Pending)) => "capture did not complete".to_string(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, reference = %request.reference, "card capture errored");
                format!("capture failed: {e}")
            }
            Err(_) => "capture timed out".to_string(),
        };
        PaymentOutcome::Declined { provider, reason }
    }
}

pub struct AsyncPush<'a> {
    provider: &'a dyn MobileMoneyProvider,
    phone: String,
    timeout: Duration,
}

#[async_trait]
impl PaymentConfirmation for AsyncPush<'_> {
    async fn secure(&self, request: &PaymentRequest) -> PaymentOutcome {
        let provider = self.provider.name().to_string();
        let push = PushRequest {
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
            phone: self.phone.clone(),
            reference: request.reference.clone(),
        };

        // Nothing is parked until the provider hands back a correlation id,
        // so a push that never answers is a decline.
        match tokio::time::timeout(self.timeout, self.provider.initiate(&push)).await {
            Ok(Ok(correlation_id)) => PaymentOutcome::Deferred(PaymentAttempt {
                provider,
                amount_cents: request.amount_cents,
                correlation_id,
                outcome: AttemptOutcome::Pending,
            }),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, reference = %request.reference, "mobile money push failed");
                PaymentOutcome::Declined {
                    provider,
                    reason: format!("could not start mobile money payment: {e}"),
                }
            }
            Err(_) => {
                tracing::warn!(reference = %request.reference, "mobile money push timed out");
                PaymentOutcome::Declined {
                    provider,
                    reason: "mobile money provider did not respond".to_string(),
                }
            }
        }
    }
}

/// Picks the strategy for a plan. Fails when the plan needs a provider
/// this deployment has not configured.
pub fn confirmation_for<'a>(
    plan: &PaymentPlan,
    state: &'a AppState,
) -> Result<Box<dyn PaymentConfirmation + 'a>, AppError> {
    match plan {
        PaymentPlan::PayAtVenue => Ok(Box::new(NoPaymentRequired)),
        PaymentPlan::Card { source_token } => {
            if source_token.trim().is_empty() {
                return Err(AppError::Validation("card payment requires a source token".into()));
            }
            let processor = state
                .card_processor
                .as_deref()
                .ok_or_else(|| AppError::Validation("card payments are not enabled".into()))?;
            Ok(Box::new(SynchronousCapture {
                processor,
                source_token: source_token.clone(),
                timeout: state.config.provider_timeout(),
            }))
        }
        PaymentPlan::MobileMoney { phone } => {
            if phone.trim().is_empty() {
                return Err(AppError::Validation(
                    "mobile money payment requires a phone number".into(),
                ));
            }
            let provider = state
                .mobile_money
                .as_deref()
                .ok_or_else(|| AppError::Validation("mobile money payments are not enabled".into()))?;
            Ok(Box::new(AsyncPush {
                provider,
                phone: phone.trim().to_string(),
                timeout: state.config.provider_timeout(),
            }))
        }
    }
}
