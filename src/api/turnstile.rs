//! Human-verification challenge check.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::TurnstileConfig;

/// Header carrying the client-side challenge response
pub const TURNSTILE_HEADER: &str = "cf-turnstile-response";

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TurnstileError {
    #[error("verification service unreachable: {0}")]
    Unavailable(String),
    #[error("verification service returned HTTP {0}")]
    Status(u16),
    #[error("verification service returned an unreadable body: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SiteverifyResponse {
    pub success: bool,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TurnstileVerifier {
    client: Client,
    verify_url: String,
}

impl TurnstileVerifier {
    pub fn new(config: &TurnstileConfig) -> Result<Self, TurnstileError> {
        let client = Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .map_err(|e| TurnstileError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            verify_url: config.verify_url.clone(),
        })
    }

    /// Post the challenge response. `idempotency_key` lets the service dedupe retries.
    pub async fn verify(
        &self,
        secret: &str,
        token: &str,
        remote_ip: Option<&str>,
        idempotency_key: &str,
    ) -> Result<SiteverifyResponse, TurnstileError> {
        let mut form = vec![
            ("secret", secret),
            ("response", token),
            ("idempotency_key", idempotency_key),
        ];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let response = self
            .client
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TurnstileError::Unavailable(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TurnstileError::Status(status.as_u16()));
        }

        let outcome: SiteverifyResponse = response
            .json()
            .await
            .map_err(|e| TurnstileError::InvalidResponse(e.without_url().to_string()))?;
        debug!(
            success = outcome.success,
            error_codes = ?outcome.error_codes,
            "Verification service answered"
        );
        Ok(outcome)
    }
}
