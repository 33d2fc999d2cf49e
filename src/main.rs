//! Club Round Worker — Entry Point
//!
//! Initializes configuration, logging, the signer and exchange clients
//! and the database pool, then runs the round poller until SIGINT/SIGTERM.
//!
//! Wiring sequence:
//! 1. Load .env, config.toml + env overrides, validate
//! 2. Init tracing (JSON or pretty structured logging)
//! 3. Read required secrets from env (signer stamp key, builder credentials)
//! 4. Create ApiKeyStamper (checks the operator key pair)
//! 5. Create TurnkeyClient + RemoteSigner (DigestSigner port)
//! 6. Create ClobClient + ClobExchange (Exchange port)
//! 7. Create PgStore (RoundRepository port)
//! 8. Run the Poller until a shutdown signal, then close the pool

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use club_round_worker::adapters::api::auth::BuilderAuth;
use club_round_worker::adapters::api::{ClobClient, ClobClientConfig, ClobExchange, ExchangeSettings};
use club_round_worker::adapters::persistence::PgStore;
use club_round_worker::adapters::signer::{ApiKeyStamper, RemoteSigner, TurnkeyClient};
use club_round_worker::config::{self, WorkerConfig};
use club_round_worker::ports::signer::DigestSigner;
use club_round_worker::usecases::{Poller, PollerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    dotenvy::dotenv().ok();
    let path = config::loader::process_env(config::loader::CONFIG_PATH_ENV)
        .unwrap_or_else(|| config::loader::DEFAULT_CONFIG_PATH.to_string());
    let config = config::loader::load_config(&path, config::loader::process_env)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured logging ────────────────────
    init_tracing(&config.worker);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        poll_interval_ms = config.worker.poll_interval_ms,
        batch_size = config.worker.batch_size,
        "Starting club round worker"
    );

    // ── 3. Secrets ──────────────────────────────────────────
    let secrets = config::loader::load_secrets(config::loader::process_env)
        .context("Missing required credentials")?;

    // ── 4. Operator stamp key ───────────────────────────────
    let stamper = Arc::new(
        ApiKeyStamper::new(&secrets.signer_public_key, &secrets.signer_private_key)
            .context("Operator signer key pair rejected")?,
    );
    info!(public_key = stamper.public_key(), "Signer stamp key loaded");

    // ── 5. Remote signer ────────────────────────────────────
    let turnkey = Arc::new(
        TurnkeyClient::new(
            &config.signer.api_url,
            Duration::from_millis(config.signer.timeout_ms),
            Arc::clone(&stamper),
        )
        .context("Failed to create signer client")?,
    );
    let signer: Arc<dyn DigestSigner> = Arc::new(RemoteSigner::new(turnkey));

    // ── 6. Exchange client + facade ─────────────────────────
    let clob = Arc::new(
        ClobClient::new(ClobClientConfig {
            base_url: config.exchange.clob_url.clone(),
            timeout: Duration::from_millis(config.exchange.timeout_ms),
            max_concurrent: config.exchange.max_concurrent,
            max_retries: config.exchange.max_retries,
            retry_base_delay: Duration::from_millis(config.exchange.retry_base_delay_ms),
        })
        .context("Failed to create CLOB client")?,
    );
    let builder = BuilderAuth::new(
        secrets.builder_api_key.clone(),
        secrets.builder_secret.clone(),
        secrets.builder_passphrase.clone(),
    )
    .context("Invalid builder credentials")?;
    let settings = ExchangeSettings {
        chain_id: config.exchange.chain_id,
        exchange_address: config
            .exchange
            .exchange_address
            .parse()
            .context("Invalid exchange address")?,
        fee_rate_bps: config.exchange.fee_rate_bps,
        derive_missing_credentials: config.exchange.derive_missing_credentials,
    };
    let exchange = Arc::new(ClobExchange::new(clob, signer, Some(builder), settings));

    // ── 7. Database ─────────────────────────────────────────
    let store = Arc::new(
        PgStore::connect_lazy(
            &config.database.url,
            config.database.max_connections,
            Duration::from_millis(config.database.acquire_timeout_ms),
        )
        .context("Failed to create database pool")?,
    );

    // ── 8. Poll until shutdown ──────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, finishing current round");
        if shutdown_tx.send(true).is_err() {
            warn!("Poller already stopped");
        }
    });

    let poller = Poller::new(
        Arc::clone(&store),
        exchange,
        PollerSettings {
            interval: config.worker.poll_interval(),
            batch_size: config.worker.batch_size,
            require_credentials: !config.exchange.derive_missing_credentials,
        },
    );
    poller.run(shutdown_rx).await;

    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// JSON by default; `pretty` for local runs. `RUST_LOG` wins over config.
fn init_tracing(worker: &WorkerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&worker.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if worker.log_format == "pretty" {
        builder.pretty().init();
    } else {
        builder.json().init();
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
