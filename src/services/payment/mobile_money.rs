use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{MobileMoneyProvider, PushRequest};
use crate::models::AttemptOutcome;

/// Mobile-money aggregator exposing push and status endpoints.
pub struct HttpMobileMoneyProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpMobileMoneyProvider {
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
impl MobileMoneyProvider for HttpMobileMoneyProvider {
    fn name(&self) -> &str {
        "mobile_money"
    }

    async fn initiate(&self, request: &PushRequest) -> anyhow::Result<String> {
        let body = json!({
            "amount": request.amount_cents,
            "currency": request.currency,
            "phone": request.phone,
            "reference": request.reference,
        });

        let resp = self
            .client
            .post(format!("{}/v1/push", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call mobile money provider")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse mobile money response")?;

        if !status.is_success() {
            anyhow::bail!("mobile money provider error ({}): {}", status, data);
        }

        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing id in mobile money response"))
    }

    async fn poll(&self, correlation_id: &str) -> anyhow::Result<AttemptOutcome> {
        let resp = self
            .client
            .get(format!("{}/v1/push/{}", self.base_url, correlation_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to poll mobile money provider")?
            .error_for_status()
            .context("mobile money provider returned error")?;

        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse mobile money status")?;

        let raw = data["status"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing status in mobile money response"))?;
        AttemptOutcome::parse(raw)
            .ok_or_else(|| anyhow::anyhow!("unknown mobile money status: {raw}"))
    }
}
