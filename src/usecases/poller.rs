//! Poller - The Worker's Single Cooperative Loop
//!
//! Each cycle runs the execution phase then the settlement phase over a
//! bounded batch. Rounds and members are processed one at a time; the
//! only concurrency is the shutdown signal raced against the sleep.
//!
//! Backoff: a cycle that fails outright (store unreachable, listing
//! error) doubles the next sleep once. Waiting states such as "no due
//! rounds" or "market unresolved" are not errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::execution::{ExecutionPhase, ExecutionReport};
use super::settlement::{SettlementPhase, SettlementReport};
use crate::ports::exchange::Exchange;
use crate::ports::repository::RoundRepository;

/// Loop tunables.
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
  /// Target time between cycle starts.
  pub interval: Duration,
  /// Maximum rounds per phase per cycle.
  pub batch_size: usize,
  /// Whether members must carry stored exchange credentials.
  pub require_credentials: bool,
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
  /// Execution phase summary.
  pub execution: ExecutionReport,
  /// Settlement phase summary.
  pub settlement: SettlementReport,
}

/// Runs both phases of the round state machine on a fixed interval.
pub struct Poller<R: RoundRepository, E: Exchange> {
  execution: ExecutionPhase<R, E>,
  settlement: SettlementPhase<R, E>,
  settings: PollerSettings,
}

impl<R: RoundRepository, E: Exchange> Poller<R, E> {
  /// Wire both phases over the same store and exchange.
  pub fn new(repo: Arc<R>, exchange: Arc<E>, settings: PollerSettings) -> Self {
    Self {
      execution: ExecutionPhase::new(Arc::clone(&repo), Arc::clone(&exchange), settings.require_credentials),
      settlement: SettlementPhase::new(repo, exchange),
      settings,
    }
  }

  /// One execution pass then one settlement sweep.
  #[instrument(skip_all)]
  pub async fn poll_once(&self, shutdown: &watch::Receiver<bool>) -> Result<CycleReport> {
    let execution = self.execution.run_batch(self.settings.batch_size, shutdown).await?;
    let settlement = self.settlement.sweep(self.settings.batch_size, shutdown).await?;
    Ok(CycleReport { execution, settlement })
  }

  /// Sleep before the next cycle given how the last one went.
  pub fn next_delay(&self, elapsed: Duration, failed: bool) -> Duration {
    if failed {
      self.settings.interval.saturating_mul(2)
    } else {
      self.settings.interval.saturating_sub(elapsed)
    }
  }

  /// Run until `shutdown` turns true or its sender is dropped.
  ///
  /// Shutdown is observed between rounds and during the sleep; a round in
  /// progress always completes first.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    info!(
      interval_ms = u64::try_from(self.settings.interval.as_millis()).unwrap_or(u64::MAX),
      batch_size = self.settings.batch_size,
      "Poller started"
    );

    loop {
      if *shutdown.borrow() {
        break;
      }

      let started = Instant::now();
      let failed = match self.poll_once(&shutdown).await {
        Ok(_) => false,
        Err(e) => {
          error!(error = %format!("{e:#}"), "Poll cycle failed, backing off");
          true
        }
      };
      let delay = self.next_delay(started.elapsed(), failed);

      tokio::select! {
        () = tokio::time::sleep(delay) => {}
        changed = shutdown.changed() => {
          if changed.is_err() {
            break;
          }
        }
      }
    }

    info!("Poller stopped");
  }
}
