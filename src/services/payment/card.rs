use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{CaptureRequest, CardProcessor};
use crate::models::AttemptOutcome;

/// Card/wallet processor behind a JSON capture endpoint.
pub struct HttpCardProcessor {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpCardProcessor {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl CardProcessor for HttpCardProcessor {
    fn name(&self) -> &str {
        "card"
    }

    async fn capture(&self, request: &CaptureRequest) -> anyhow::Result<AttemptOutcome> {
        let body = json!({
            "amount": request.amount_cents,
            "currency": request.currency,
            "source": request.source_token,
            "reference": request.correlation_ref,
        });

        let resp = self
            .client
            .post(format!("{}/v1/captures", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.correlation_ref)
            .json(&body)
            .send()
            .await
            .context("failed to call card processor")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse card processor response")?;

        // 402 is a decline, anything else non-2xx is an error
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            return Ok(AttemptOutcome::Failed);
        }
        if !status.is_success() {
            anyhow::bail!("card processor error ({}): {}", status, data);
        }

        data["status"]
            .as_str()
            .and_then(AttemptOutcome::parse)
            .ok_or_else(|| anyhow::anyhow!("missing status in card processor response"))
    }
}
