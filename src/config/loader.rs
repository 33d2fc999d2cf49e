//! Configuration Loader - File Loading, Env Overrides and Validation
//!
//! Handles loading `config.toml`, applying environment overrides,
//! validating all parameters, and reading the required secrets.
//! Environment access goes through a lookup function so tests never
//! touch the process environment.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, Secrets};
use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "WORKER_CONFIG";

/// Config file used when `WORKER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Process environment, treating empty values as unset.
pub fn process_env(key: &str) -> Option<String> {
  std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Load, override and validate the configuration.
///
/// A missing file is not an error: defaults plus environment overrides
/// are enough to run.
///
/// # Errors
/// Returns detailed error if:
/// - The file exists but can't be read or parsed
/// - An override can't be parsed
/// - Validation rules are violated
pub fn load_config(path: &str, env: impl Fn(&str) -> Option<String>) -> Result<AppConfig> {
  let path = Path::new(path);

  let mut config: AppConfig = if path.exists() {
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?
  } else {
    AppConfig::default()
  };

  apply_env_overrides(&mut config, &env)?;
  validate_config(&config)?;

  info!(
    file = %path.display(),
    poll_interval_ms = config.worker.poll_interval_ms,
    batch_size = config.worker.batch_size,
    chain_id = config.exchange.chain_id,
    derive_credentials = config.exchange.derive_missing_credentials,
    "Configuration loaded successfully"
  );

  Ok(config)
}

fn parsed<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
  raw
    .trim()
    .parse()
    .map_err(|_| ConfigError::Invalid(format!("{key}={raw} is not a valid value")))
}

/// Overlay environment variables on top of file values.
pub fn apply_env_overrides(config: &mut AppConfig, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
  if let Some(v) = env("POLL_INTERVAL_MS") {
    config.worker.poll_interval_ms = parsed("POLL_INTERVAL_MS", &v)?;
  }
  if let Some(v) = env("BATCH_SIZE") {
    config.worker.batch_size = parsed("BATCH_SIZE", &v)?;
  }
  if let Some(v) = env("LOG_LEVEL") {
    config.worker.log_level = v;
  }
  if let Some(v) = env("LOG_FORMAT") {
    config.worker.log_format = v;
  }
  if let Some(v) = env("CLOB_API_URL") {
    config.exchange.clob_url = v;
  }
  if let Some(v) = env("CHAIN_ID") {
    config.exchange.chain_id = parsed("CHAIN_ID", &v)?;
  }
  if let Some(v) = env("EXCHANGE_ADDRESS") {
    config.exchange.exchange_address = v;
  }
  if let Some(v) = env("DERIVE_MISSING_CREDENTIALS") {
    config.exchange.derive_missing_credentials = parsed("DERIVE_MISSING_CREDENTIALS", &v)?;
  }
  if let Some(v) = env("TURNKEY_API_BASE_URL") {
    config.signer.api_url = v;
  }
  if let Some(v) = env("DATABASE_URL") {
    config.database.url = v;
  }
  Ok(())
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    config.worker.poll_interval_ms >= 100,
    "poll_interval_ms must be at least 100, got {}",
    config.worker.poll_interval_ms
  );
  anyhow::ensure!(
    config.worker.batch_size > 0,
    "batch_size must be positive"
  );
  anyhow::ensure!(
    matches!(config.worker.log_format.as_str(), "json" | "pretty"),
    "log_format must be json or pretty, got {}",
    config.worker.log_format
  );

  anyhow::ensure!(
    !config.exchange.clob_url.is_empty(),
    "CLOB API URL must not be empty"
  );
  anyhow::ensure!(config.exchange.chain_id > 0, "chain_id must be positive");
  anyhow::ensure!(
    config.exchange.exchange_address.parse::<alloy::primitives::Address>().is_ok(),
    "exchange_address {} is not an address",
    config.exchange.exchange_address
  );
  anyhow::ensure!(
    config.exchange.max_concurrent > 0,
    "exchange.max_concurrent must be positive"
  );
  anyhow::ensure!(
    !config.signer.api_url.is_empty(),
    "Signer API URL must not be empty"
  );

  if config.database.url.is_empty() {
    return Err(ConfigError::MissingEnv("DATABASE_URL").into());
  }
  anyhow::ensure!(
    config.database.max_connections > 0,
    "database.max_connections must be positive"
  );

  Ok(())
}

/// Read every required secret.
///
/// # Errors
/// [`ConfigError::MissingEnv`] naming the first absent variable.
pub fn load_secrets(env: impl Fn(&str) -> Option<String>) -> Result<Secrets, ConfigError> {
  let required = |key: &'static str| env(key).ok_or(ConfigError::MissingEnv(key));
  Ok(Secrets {
    signer_public_key: required("TURNKEY_API_PUBLIC_KEY")?,
    signer_private_key: required("TURNKEY_API_PRIVATE_KEY")?,
    builder_api_key: required("POLY_BUILDER_API_KEY")?,
    builder_secret: required("POLY_BUILDER_SECRET")?,
    builder_passphrase: required("POLY_BUILDER_PASSPHRASE")?,
  })
}
