//! Configuration Module - TOML-based Worker Configuration
//!
//! Loads and validates configuration from `config.toml` with
//! environment variable overrides via `.env` files.
//! Endpoints, contract addresses and loop tunables live here; secrets
//! are only ever read from the environment.

pub mod loader;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Top-level worker configuration.
///
/// Every section is optional in the file; missing values take their
/// defaults, then environment overrides apply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Loop tunables and logging.
  pub worker: WorkerConfig,
  /// Order book exchange endpoints and protocol parameters.
  pub exchange: ExchangeConfig,
  /// Remote custodial signer endpoint.
  pub signer: SignerConfig,
  /// Shared relational store.
  pub database: DatabaseConfig,
}

/// Poll loop and logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Time between poll cycles (milliseconds).
  pub poll_interval_ms: u64,
  /// Maximum rounds per phase per cycle.
  pub batch_size: usize,
  /// Log level (trace, debug, info, warn, error).
  pub log_level: String,
  /// `json` or `pretty`.
  pub log_format: String,
}

impl WorkerConfig {
  /// Poll interval as a `Duration`.
  pub const fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: 30_000,
      batch_size: 25,
      log_level: "info".to_string(),
      log_format: "json".to_string(),
    }
  }
}

/// Exchange configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
  /// CLOB REST API base URL.
  pub clob_url: String,
  /// Chain id used in EIP-712 domains.
  pub chain_id: u64,
  /// Exchange contract that verifies order signatures.
  pub exchange_address: String,
  /// Fee rate written into each order (basis points).
  pub fee_rate_bps: u64,
  /// Request timeout (milliseconds).
  pub timeout_ms: u64,
  /// Retries on 429 / 5xx / transport errors.
  pub max_retries: u32,
  /// Base backoff between retries (milliseconds).
  pub retry_base_delay_ms: u64,
  /// Maximum in-flight requests.
  pub max_concurrent: usize,
  /// Derive member API credentials through the signer when none are stored.
  pub derive_missing_credentials: bool,
}

impl Default for ExchangeConfig {
  fn default() -> Self {
    Self {
      clob_url: "https://clob.polymarket.com".to_string(),
      chain_id: 137,
      exchange_address: "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".to_string(),
      fee_rate_bps: 0,
      timeout_ms: 10_000,
      max_retries: 3,
      retry_base_delay_ms: 200,
      max_concurrent: 4,
      derive_missing_credentials: false,
    }
  }
}

/// Remote signer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
  /// Signer API base URL.
  pub api_url: String,
  /// Request timeout (milliseconds).
  pub timeout_ms: u64,
}

impl Default for SignerConfig {
  fn default() -> Self {
    Self {
      api_url: "https://api.turnkey.com".to_string(),
      timeout_ms: 10_000,
    }
  }
}

/// Database configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  /// Connection URL. Required; usually supplied as `DATABASE_URL`.
  pub url: String,
  /// Pool size.
  pub max_connections: u32,
  /// Wait for a pooled connection (milliseconds).
  pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      max_connections: 5,
      acquire_timeout_ms: 5_000,
    }
  }
}

impl fmt::Debug for DatabaseConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DatabaseConfig")
      .field("url", &"<redacted>")
      .field("max_connections", &self.max_connections)
      .field("acquire_timeout_ms", &self.acquire_timeout_ms)
      .finish()
  }
}

/// Credentials read from the environment at startup. All required.
#[derive(Clone)]
pub struct Secrets {
  /// Operator stamp key, compressed P-256 public key (hex).
  pub signer_public_key: String,
  /// Operator stamp key, P-256 private scalar (hex).
  pub signer_private_key: String,
  /// Exchange builder API key.
  pub builder_api_key: String,
  /// Exchange builder secret (base64url).
  pub builder_secret: String,
  /// Exchange builder passphrase.
  pub builder_passphrase: String,
}

impl fmt::Debug for Secrets {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Secrets")
      .field("signer_public_key", &self.signer_public_key)
      .field("signer_private_key", &"<redacted>")
      .field("builder_api_key", &self.builder_api_key)
      .field("builder_secret", &"<redacted>")
      .field("builder_passphrase", &"<redacted>")
      .finish()
  }
}
