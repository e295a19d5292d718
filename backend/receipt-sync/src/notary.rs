//! HTTP client for the external notarization (proof issuance) service.
//!
//! Every submission carries the receipt's transaction hash as its
//! `Idempotency-Key`, so resubmitting an already notarized payment yields the
//! existing identifier instead of a second proof.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::errors::{Result, SyncError};
use crate::store::{Notarizer, PaymentRequest};

const PAYMENT_PATH: &str = "/v1/receipts/payment";

#[derive(Debug, Deserialize)]
struct NotarizationResponse {
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct HttpNotarizer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpNotarizer {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Notarizer for HttpNotarizer {
    async fn submit_payment(&self, request: &PaymentRequest) -> Result<String> {
        let mut req = self
            .client
            .post(format!("{}{PAYMENT_PATH}", self.base_url))
            .header("Idempotency-Key", &request.idempotency_token)
            .json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::TransientRpc(format!("notarization request failed: {e}")))?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!("Notarization service answered {status} for {}", request.idempotency_token);

        interpret_response(status, &body)
    }
}

/// Map the service's answer to a notarization id. A `409 Conflict` that
/// carries an id means the idempotency key was already notarized.
fn interpret_response(status: StatusCode, body: &str) -> Result<String> {
    let parsed: Option<NotarizationResponse> = serde_json::from_str(body).ok();

    if status.is_success() || status == StatusCode::CONFLICT {
        if let Some(id) = parsed
            .as_ref()
            .and_then(|p| p.id.as_deref())
            .filter(|id| !id.is_empty())
        {
            return Ok(id.to_string());
        }
    }

    let detail = parsed
        .and_then(|p| p.error)
        .unwrap_or_else(|| body.chars().take(200).collect());
    Err(SyncError::TransientRpc(format!(
        "notarization service returned {status} without an id: {detail}"
    )))
}
