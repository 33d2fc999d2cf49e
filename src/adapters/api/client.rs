//! CLOB HTTP Client - Retrying REST API Client
//!
//! Wraps reqwest with retries and a concurrency cap for all Polymarket
//! CLOB REST API interactions. Authentication headers are supplied per
//! request by the caller, since each member signs with their own keys.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::auth::AuthHeaders;

/// Non-retryable HTTP status returned by the exchange.
#[derive(Debug, thiserror::Error)]
#[error("API error {status}: {body}")]
pub struct HttpStatusError {
  /// HTTP status code.
  pub status: u16,
  /// Raw response body.
  pub body: String,
}

impl HttpStatusError {
  /// Response body parsed as JSON, if it is JSON.
  pub fn json(&self) -> Option<Value> {
    serde_json::from_str(&self.body).ok()
  }
}

/// Configuration for the CLOB HTTP client.
#[derive(Debug, Clone)]
pub struct ClobClientConfig {
  /// Base URL for the CLOB API.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
}

impl Default for ClobClientConfig {
  fn default() -> Self {
    Self {
      base_url: "https://clob.polymarket.com".to_string(),
      timeout: Duration::from_secs(30),
      max_concurrent: 4,
      max_retries: 3,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

/// HTTP client for the Polymarket CLOB API.
pub struct ClobClient {
  /// Underlying HTTP client.
  http: Client,
  /// Client configuration.
  config: ClobClientConfig,
  /// Concurrency limiter.
  semaphore: Arc<Semaphore>,
}

impl ClobClient {
  /// Create a new CLOB client.
  pub fn new(config: ClobClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

    Ok(Self {
      http,
      config: ClobClientConfig {
        base_url: config.base_url.trim_end_matches('/').to_string(),
        ..config
      },
      semaphore,
    })
  }

  /// Execute a GET request and parse the JSON answer.
  pub async fn get(&self, path: &str, headers: &AuthHeaders) -> Result<Value> {
    let url = format!("{}{}", self.config.base_url, path);
    let request = self.http.get(&url);
    self.execute_with_retry(request, path, headers).await
  }

  /// Execute a POST request with a JSON body and parse the JSON answer.
  pub async fn post(&self, path: &str, body: &str, headers: &AuthHeaders) -> Result<Value> {
    let url = format!("{}{}", self.config.base_url, path);
    let request = self
      .http
      .post(&url)
      .header("Content-Type", "application/json")
      .body(body.to_string());
    self.execute_with_retry(request, path, headers).await
  }

  /// Execute request with the given headers, retrying transient failures.
  async fn execute_with_retry(&self, request: RequestBuilder, path: &str, headers: &AuthHeaders) -> Result<Value> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .context("Semaphore closed")?;

    let mut last_error = None;

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, path, delay_ms = delay.as_millis(), "Retrying request");
        sleep(delay).await;
      }

      let mut req = request
        .try_clone()
        .context("Failed to clone request")?;
      for (name, value) in headers {
        req = req.header(*name, value);
      }

      match req.send().await {
        Ok(response) => match response.status() {
          StatusCode::TOO_MANY_REQUESTS => {
            warn!(path, "Rate limited by CLOB API, backing off");
            last_error = Some(anyhow::anyhow!("Rate limited"));
          }
          status if status.is_server_error() => {
            warn!(path, status = %status, "Server error, retrying");
            last_error = Some(anyhow::anyhow!("Server error: {status}"));
          }
          status if status.is_success() => {
            let text = response.text().await.context("Failed to read response body")?;
            if text.trim().is_empty() {
              return Ok(Value::Null);
            }
            return serde_json::from_str(&text).with_context(|| format!("Response from {path} is not JSON"));
          }
          status => {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpStatusError {
              status: status.as_u16(),
              body,
            }
            .into());
          }
        },
        Err(e) => {
          warn!(error = %e, attempt, path, "Request failed");
          last_error = Some(e.into());
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
  }
}
