//! Settlement Phase - COMMITTED Rounds to SETTLED
//!
//! Credits member payouts once the round's market has resolved.
//!
//! Settlement flow per round:
//! 1. Take the resolution stored on the round, else ask the exchange
//! 2. Wait (no error) while the market is unresolved or has no winner
//! 3. Re-read fills for unsettled orders that report none yet
//! 4. Derive every member's payout; any unknown payout fails the round
//! 5. Write payouts and the SETTLED status in one atomic store call
//!
//! The store call keys off PAYOUT entries and `settled_at` already
//! written, so re-running settlement on a settled round changes nothing.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::round::{MarketResolution, Round, RoundMember, compute_payouts};
use crate::ports::exchange::Exchange;
use crate::ports::repository::{RoundRepository, SettleOutcome};

/// What one settlement pass did to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundSettlement {
  /// Payouts were written (possibly partially by an earlier run).
  Settled {
    /// Winning outcome label.
    outcome: String,
    /// Store-level effect of this call.
    effect: SettleOutcome,
  },
  /// The market has not resolved yet.
  Unresolved,
  /// Resolved but no winning outcome could be read.
  AwaitingOutcome,
}

/// Aggregated report from a settlement sweep.
#[derive(Debug, Clone)]
pub struct SettlementReport {
  /// Rounds examined.
  pub rounds_seen: usize,
  /// Rounds moved to SETTLED by this sweep.
  pub rounds_settled: usize,
  /// Rounds still waiting on their market.
  pub rounds_waiting: usize,
  /// Rounds that raised an error.
  pub rounds_failed: usize,
  /// PAYOUT entries inserted.
  pub payouts_inserted: usize,
  /// Timestamp of the sweep.
  pub timestamp: chrono::DateTime<Utc>,
}

impl Default for SettlementReport {
  fn default() -> Self {
    Self {
      rounds_seen: 0,
      rounds_settled: 0,
      rounds_waiting: 0,
      rounds_failed: 0,
      payouts_inserted: 0,
      timestamp: Utc::now(),
    }
  }
}

/// Settlement phase of the round state machine.
pub struct SettlementPhase<R: RoundRepository, E: Exchange> {
  repo: Arc<R>,
  exchange: Arc<E>,
}

impl<R: RoundRepository, E: Exchange> SettlementPhase<R, E> {
  /// Create the phase over shared store and exchange handles.
  pub fn new(repo: Arc<R>, exchange: Arc<E>) -> Self {
    Self { repo, exchange }
  }

  /// Settle up to `batch_size` committed rounds, oldest first.
  pub async fn sweep(&self, batch_size: usize, shutdown: &watch::Receiver<bool>) -> Result<SettlementReport> {
    let rounds = self
      .repo
      .list_rounds_to_settle(batch_size)
      .await
      .context("Failed to list rounds to settle")?;

    let mut report = SettlementReport::default();
    if rounds.is_empty() {
      debug!("No rounds due for settlement");
      return Ok(report);
    }

    for round in &rounds {
      if *shutdown.borrow() {
        info!(remaining = rounds.len() - report.rounds_seen, "Shutdown requested, stopping settlement sweep");
        break;
      }
      report.rounds_seen += 1;

      match self.settle_round(round).await {
        Ok(RoundSettlement::Settled { effect, .. }) => {
          report.payouts_inserted += effect.payouts_inserted;
          if effect.round_transitioned {
            report.rounds_settled += 1;
          }
        }
        Ok(RoundSettlement::Unresolved | RoundSettlement::AwaitingOutcome) => report.rounds_waiting += 1,
        Err(e) => {
          report.rounds_failed += 1;
          error!(round_id = %round.id, error = %format!("{e:#}"), "Round settlement failed");
        }
      }
    }

    report.timestamp = Utc::now();
    info!(
      seen = report.rounds_seen,
      settled = report.rounds_settled,
      waiting = report.rounds_waiting,
      failed = report.rounds_failed,
      payouts = report.payouts_inserted,
      "Settlement sweep complete"
    );
    Ok(report)
  }

  /// Run one settlement pass over a single round.
  ///
  /// # Errors
  /// `SettlementError::MissingPayoutData` (wrapped) when a member's
  /// payout cannot be derived; the round stays COMMITTED.
  #[instrument(skip(self, round), fields(round_id = %round.id))]
  pub async fn settle_round(&self, round: &Round) -> Result<RoundSettlement> {
    let resolution = self.resolution(round).await?;
    if !resolution.is_resolved {
      debug!("Market not resolved yet");
      return Ok(RoundSettlement::Unresolved);
    }
    let Some(outcome) = resolution.outcome.clone() else {
      warn!("Market resolved without a readable outcome, waiting");
      return Ok(RoundSettlement::AwaitingOutcome);
    };

    let mut members = self
      .repo
      .get_round_members(&round.id)
      .await
      .with_context(|| format!("Failed to load members of round {}", round.id))?;
    self.refresh_fills(&mut members).await?;
    let payouts = compute_payouts(round, &members, &outcome)?;

    let effect = self
      .repo
      .settle_round(round, &members, &payouts, &resolution)
      .await
      .with_context(|| format!("Failed to settle round {}", round.id))?;

    if effect.is_noop() {
      info!(outcome = %outcome, "Round already settled");
    } else {
      info!(
        outcome = %outcome,
        members = members.len(),
        payouts_inserted = effect.payouts_inserted,
        members_updated = effect.members_updated,
        total_payout = payouts.iter().map(|p| p.payout_amount).sum::<u64>(),
        "Round settled"
      );
    }
    Ok(RoundSettlement::Settled { outcome, effect })
  }

  /// Fetch live fill data for unsettled members whose order reports no
  /// filled shares, persisting any fill found. A failed lookup leaves the
  /// member as is; payout derivation then fails the round for a retry.
  async fn refresh_fills(&self, members: &mut [RoundMember]) -> Result<usize> {
    let mut refreshed = 0usize;
    for member in members.iter_mut() {
      if member.settled_at.is_some() || member.order.filled_shares().is_some() {
        continue;
      }
      let Some(order_id) = member.order.order_id.clone().filter(|id| !id.trim().is_empty()) else {
        continue;
      };
      let identity = match member.identity(false) {
        Ok(identity) => identity,
        Err(missing) => {
          warn!(member_id = %member.id, missing = ?missing, "Cannot refresh fill, member not tradable");
          continue;
        }
      };

      let live = match self.exchange.get_order(&identity, &order_id).await {
        Ok(live) => live,
        Err(e) => {
          warn!(member_id = %member.id, order_id = %order_id, error = %format!("{e:#}"), "Order fill lookup failed");
          continue;
        }
      };
      let merged = member.order.clone().merge_live(live);
      if merged.filled_shares().is_none() {
        debug!(member_id = %member.id, order_id = %order_id, "Order still reports no fill");
        continue;
      }

      let written = self
        .repo
        .update_member_fill(&member.id, &merged)
        .await
        .with_context(|| format!("Failed to persist fill of order {order_id} for member {}", member.id))?;
      info!(
        member_id = %member.id,
        order_id = %order_id,
        shares = ?merged.filled_shares(),
        written,
        "Order fill refreshed"
      );
      member.order = merged;
      refreshed += 1;
    }
    Ok(refreshed)
  }

  /// Stored resolution first; otherwise the exchange. A round without a
  /// market id stays unresolved.
  async fn resolution(&self, round: &Round) -> Result<MarketResolution> {
    if let Some(stored) = round.stored_resolution() {
      debug!(outcome = ?stored.outcome, "Using stored resolution");
      return Ok(stored);
    }
    let Some(condition_id) = round.condition_id.as_deref() else {
      warn!("Round has no condition id, cannot check resolution");
      return Ok(MarketResolution::unresolved());
    };
    self
      .exchange
      .get_market_resolution(condition_id)
      .await
      .with_context(|| format!("Failed to fetch resolution for {condition_id}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::persistence::InMemoryStore;
  use crate::domain::round::fixtures::{member, round};
  use crate::domain::round::{MemberIdentity, OrderFields, RoundStatus};
  use crate::error::SettlementError;
  use async_trait::async_trait;
  use rust_decimal_macros::dec;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FixedMarket(MarketResolution);

  #[async_trait]
  impl Exchange for FixedMarket {
    async fn place_market_order(&self, _member: &MemberIdentity, _token_id: &str, _amount: u64) -> Result<OrderFields> {
      anyhow::bail!("not used")
    }

    async fn get_order(&self, _member: &MemberIdentity, _order_id: &str) -> Result<OrderFields> {
      anyhow::bail!("order lookup unavailable")
    }

    async fn get_market_resolution(&self, _condition_id: &str) -> Result<MarketResolution> {
      Ok(self.0.clone())
    }
  }

  /// Resolved "Yes" market whose order lookup reports a late fill.
  struct LateFill {
    lookups: AtomicUsize,
  }

  #[async_trait]
  impl Exchange for LateFill {
    async fn place_market_order(&self, _member: &MemberIdentity, _token_id: &str, _amount: u64) -> Result<OrderFields> {
      anyhow::bail!("not used")
    }

    async fn get_order(&self, _member: &MemberIdentity, order_id: &str) -> Result<OrderFields> {
      self.lookups.fetch_add(1, Ordering::SeqCst);
      Ok(OrderFields {
        order_id: Some(order_id.to_string()),
        status: Some("MATCHED".into()),
        size_matched: Some(dec!(0.00015)),
        ..OrderFields::default()
      })
    }

    async fn get_market_resolution(&self, _condition_id: &str) -> Result<MarketResolution> {
      Ok(resolved(Some("Yes")))
    }
  }

  fn resolved(outcome: Option<&str>) -> MarketResolution {
    MarketResolution {
      is_resolved: true,
      outcome: outcome.map(String::from),
      resolved_at: None,
    }
  }

  #[tokio::test]
  async fn test_unresolved_market_leaves_round_committed() {
    let store = Arc::new(InMemoryStore::new());
    store.put_round(round("r1", RoundStatus::Committed)).await;
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(FixedMarket(MarketResolution::unresolved())));

    let r = store.round("r1").await.unwrap();
    assert_eq!(phase.settle_round(&r).await.unwrap(), RoundSettlement::Unresolved);
    assert_eq!(store.round("r1").await.unwrap().status, RoundStatus::Committed);
  }

  #[tokio::test]
  async fn test_resolved_without_outcome_waits() {
    let store = Arc::new(InMemoryStore::new());
    store.put_round(round("r1", RoundStatus::Committed)).await;
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(FixedMarket(resolved(None))));

    let r = store.round("r1").await.unwrap();
    assert_eq!(phase.settle_round(&r).await.unwrap(), RoundSettlement::AwaitingOutcome);
  }

  #[tokio::test]
  async fn test_missing_fill_data_keeps_round_committed() {
    let store = Arc::new(InMemoryStore::new());
    store.put_round(round("r1", RoundStatus::Committed)).await;
    let mut m = member("r1", "u1", 100);
    m.order.order_id = Some("0xabc".into());
    store.put_member(m).await;
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(FixedMarket(resolved(Some("Yes")))));

    let r = store.round("r1").await.unwrap();
    let err = phase.settle_round(&r).await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<SettlementError>(),
      Some(SettlementError::MissingPayoutData { .. })
    ));
    assert_eq!(store.round("r1").await.unwrap().status, RoundStatus::Committed);
    assert!(store.ledger().await.is_empty());
  }

  #[tokio::test]
  async fn test_late_fill_is_fetched_and_persisted() {
    let store = Arc::new(InMemoryStore::new());
    store.put_round(round("r1", RoundStatus::Committed)).await;
    let mut m = member("r1", "u1", 100);
    m.order.order_id = Some("0xo1".into());
    store.put_member(m).await;
    let exchange = Arc::new(LateFill {
      lookups: AtomicUsize::new(0),
    });
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::clone(&exchange));

    let r = store.round("r1").await.unwrap();
    let RoundSettlement::Settled { effect, .. } = phase.settle_round(&r).await.unwrap() else {
      panic!("expected settlement");
    };
    assert_eq!(effect.payouts_inserted, 1);
    assert_eq!(store.ledger().await[0].amount, 150);

    let members = store.get_round_members(&"r1".to_string()).await.unwrap();
    assert_eq!(members[0].order.order_id.as_deref(), Some("0xo1"));
    assert_eq!(members[0].order.size_matched, Some(dec!(0.00015)));
    assert_eq!(members[0].pnl_amount, 50);

    // Settled members are never looked up again.
    phase.settle_round(&r).await.unwrap();
    assert_eq!(exchange.lookups.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stored_resolution_skips_exchange() {
    let store = Arc::new(InMemoryStore::new());
    let mut r = round("r1", RoundStatus::Committed);
    r.resolved_outcome = Some("No".into());
    store.put_round(r.clone()).await;
    let mut m = member("r1", "u1", 100);
    m.order.order_id = Some("0xabc".into());
    m.order.taking_amount = Some(dec!(0.0002));
    store.put_member(m).await;
    let phase = SettlementPhase::new(Arc::clone(&store), Arc::new(FixedMarket(MarketResolution::unresolved())));

    let RoundSettlement::Settled { outcome, effect } = phase.settle_round(&r).await.unwrap() else {
      panic!("expected settlement");
    };
    assert_eq!(outcome, "No");
    assert_eq!(effect.payouts_inserted, 0);
    assert!(effect.round_transitioned);
  }
}
