//! Signer HTTP Client - Stamped Requests to the Custodial Key Service
//!
//! Implements the `SignerApi` port over reqwest. Bodies are serialized
//! once, stamped over those exact bytes, and sent unchanged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::stamp::{ApiKeyStamper, STAMP_HEADER};
use crate::ports::signer::SignerApi;

const SIGN_RAW_PAYLOAD_PATH: &str = "/public/v1/submit/sign_raw_payload";
const LIST_PRIVATE_KEYS_PATH: &str = "/public/v1/query/list_private_keys";
const LIST_WALLET_ACCOUNTS_PATH: &str = "/public/v1/query/list_wallet_accounts";

/// HTTP transport to the remote custodial signer.
pub struct TurnkeyClient {
    http: Client,
    base_url: String,
    stamper: Arc<ApiKeyStamper>,
}

impl TurnkeyClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration, stamper: Arc<ApiKeyStamper>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to build signer HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            stamper,
        })
    }

    /// POST a stamped JSON body and return the parsed answer.
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let bytes = serde_json::to_vec(body).context("Failed to serialize signer request")?;
        let stamp = self.stamper.stamp(&bytes)?;

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .header(STAMP_HEADER, stamp)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Signer request to {path} failed"))?;

        let status = response.status();
        let text = response.text().await.context("Failed to read signer response")?;
        debug!(path, status = %status, bytes = text.len(), "Signer response");

        if !status.is_success() {
            bail!("Signer API error {status}: {text}");
        }
        serde_json::from_str(&text).context("Signer response is not JSON")
    }
}

fn timestamp_ms() -> String {
    Utc::now().timestamp_millis().to_string()
}

#[async_trait]
impl SignerApi for TurnkeyClient {
    #[instrument(skip(self, payload), fields(org = %organization_id))]
    async fn sign_raw_payload(&self, organization_id: &str, sign_with: &str, payload: &str) -> Result<Value> {
        let body = json!({
            "type": "ACTIVITY_TYPE_SIGN_RAW_PAYLOAD_V2",
            "timestampMs": timestamp_ms(),
            "organizationId": organization_id,
            "parameters": {
                "signWith": sign_with,
                "payload": payload,
                "encoding": "PAYLOAD_ENCODING_HEXADECIMAL",
                "hashFunction": "HASH_FUNCTION_NO_OP",
            },
        });
        self.post(SIGN_RAW_PAYLOAD_PATH, &body).await
    }

    async fn list_private_keys(&self, organization_id: &str) -> Result<Value> {
        self.post(LIST_PRIVATE_KEYS_PATH, &json!({ "organizationId": organization_id }))
            .await
    }

    async fn list_wallet_accounts(&self, organization_id: &str) -> Result<Value> {
        self.post(LIST_WALLET_ACCOUNTS_PATH, &json!({ "organizationId": organization_id }))
            .await
    }
}
