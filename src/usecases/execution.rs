//! Execution Phase - PENDING Rounds to COMMITTED
//!
//! Places one fill-or-kill market buy per member and moves the round to
//! COMMITTED once every member holds an order id.
//!
//! Execution flow per round:
//! 1. Fetch members with their trading profile
//! 2. Skip the whole round if any member is not tradable
//! 3. Place orders for members without one, persisting each immediately
//! 4. Commit the round only when no member is left order-less
//!
//! Members that already carry an order id are never touched again, so a
//! restarted poll resumes without duplicate orders.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::round::{MemberIdentity, Round, RoundMember};
use crate::ports::exchange::Exchange;
use crate::ports::repository::RoundRepository;

/// What one execution pass did to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundExecution {
  /// Every member holds an order; the round moved to COMMITTED.
  Committed {
    /// Orders placed during this pass.
    orders_placed: usize,
  },
  /// Some placements failed; the round stays PENDING.
  Incomplete {
    /// Orders placed during this pass.
    orders_placed: usize,
    /// Members still without an order.
    members_without_order: usize,
  },
  /// At least one member lacks trading fields; nothing was placed.
  Ineligible {
    /// `(user_id, missing fields)` per blocked member.
    missing: Vec<(String, Vec<&'static str>)>,
  },
  /// The round has no members yet.
  NoMembers,
  /// All members had orders but another writer already moved the round.
  AlreadyAdvanced,
}

/// Aggregated result of one execution batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
  /// Rounds examined.
  pub rounds_seen: usize,
  /// Rounds moved to COMMITTED.
  pub rounds_committed: usize,
  /// Rounds left PENDING (ineligible, empty or incomplete).
  pub rounds_waiting: usize,
  /// Rounds that raised an error.
  pub rounds_failed: usize,
  /// Orders placed across the batch.
  pub orders_placed: usize,
}

/// Execution phase of the round state machine.
pub struct ExecutionPhase<R: RoundRepository, E: Exchange> {
  repo: Arc<R>,
  exchange: Arc<E>,
  /// Stored API credentials are mandatory unless the exchange derives them.
  require_credentials: bool,
}

impl<R: RoundRepository, E: Exchange> ExecutionPhase<R, E> {
  /// Create the phase over shared store and exchange handles.
  pub fn new(repo: Arc<R>, exchange: Arc<E>, require_credentials: bool) -> Self {
    Self {
      repo,
      exchange,
      require_credentials,
    }
  }

  /// Process up to `batch_size` due rounds, oldest first.
  ///
  /// Per-round failures are logged and counted; only a failure to list
  /// rounds fails the batch. `shutdown` is checked between rounds.
  pub async fn run_batch(&self, batch_size: usize, shutdown: &watch::Receiver<bool>) -> Result<ExecutionReport> {
    let rounds = self
      .repo
      .list_rounds_to_execute(batch_size)
      .await
      .context("Failed to list rounds to execute")?;

    let mut report = ExecutionReport::default();
    if rounds.is_empty() {
      debug!("No rounds due for execution");
      return Ok(report);
    }

    for round in &rounds {
      if *shutdown.borrow() {
        info!(remaining = rounds.len() - report.rounds_seen, "Shutdown requested, stopping execution batch");
        break;
      }
      report.rounds_seen += 1;

      match self.execute_round(round).await {
        Ok(RoundExecution::Committed { orders_placed }) => {
          report.rounds_committed += 1;
          report.orders_placed += orders_placed;
        }
        Ok(RoundExecution::Incomplete { orders_placed, .. }) => {
          report.rounds_waiting += 1;
          report.orders_placed += orders_placed;
        }
        Ok(RoundExecution::AlreadyAdvanced) => {}
        Ok(RoundExecution::Ineligible { .. } | RoundExecution::NoMembers) => report.rounds_waiting += 1,
        Err(e) => {
          report.rounds_failed += 1;
          error!(round_id = %round.id, error = %format!("{e:#}"), "Round execution failed");
        }
      }
    }

    info!(
      seen = report.rounds_seen,
      committed = report.rounds_committed,
      waiting = report.rounds_waiting,
      failed = report.rounds_failed,
      orders = report.orders_placed,
      "Execution batch complete"
    );
    Ok(report)
  }

  /// Run one execution pass over a single round.
  #[instrument(skip(self, round), fields(round_id = %round.id))]
  pub async fn execute_round(&self, round: &Round) -> Result<RoundExecution> {
    let Some(token_id) = round.target_token_id.as_deref().filter(|t| !t.is_empty()) else {
      warn!("Round has no target token, skipping");
      return Ok(RoundExecution::Ineligible {
        missing: vec![(String::new(), vec!["target_token_id"])],
      });
    };

    let members = self
      .repo
      .get_round_members(&round.id)
      .await
      .with_context(|| format!("Failed to load members of round {}", round.id))?;
    if members.is_empty() {
      debug!("Round has no members yet");
      return Ok(RoundExecution::NoMembers);
    }

    let identities = match self.identities(&members) {
      Ok(ids) => ids,
      Err(missing) => {
        for (user_id, fields) in &missing {
          warn!(user_id = %user_id, missing = ?fields, "Member not tradable, round not ready");
        }
        return Ok(RoundExecution::Ineligible { missing });
      }
    };

    let mut orders_placed = 0usize;
    let mut without_order = 0usize;

    for (member, identity) in members.iter().zip(&identities) {
      if member.has_order() {
        debug!(member_id = %member.id, "Member already has an order");
        continue;
      }

      match self.exchange.place_market_order(identity, token_id, member.commit_amount).await {
        Ok(order) => {
          let written = self
            .repo
            .update_member_order(&member.id, &order)
            .await
            .with_context(|| {
              format!(
                "Order {} placed for member {} but not persisted",
                order.order_id.as_deref().unwrap_or_default(),
                member.id
              )
            })?;
          if written {
            orders_placed += 1;
            info!(
              member_id = %member.id,
              user_id = %member.user_id,
              order_id = order.order_id.as_deref().unwrap_or_default(),
              status = order.status.as_deref().unwrap_or_default(),
              "Order placed"
            );
          } else {
            warn!(member_id = %member.id, "Member order already recorded by another writer");
          }
        }
        Err(e) => {
          without_order += 1;
          warn!(
            member_id = %member.id,
            user_id = %member.user_id,
            amount = member.commit_amount,
            error = %format!("{e:#}"),
            "Order placement failed"
          );
        }
      }
    }

    if without_order > 0 {
      info!(orders_placed, members_without_order = without_order, "Round stays pending");
      return Ok(RoundExecution::Incomplete {
        orders_placed,
        members_without_order: without_order,
      });
    }

    if self
      .repo
      .mark_round_committed(&round.id)
      .await
      .with_context(|| format!("Failed to commit round {}", round.id))?
    {
      info!(orders_placed, members = members.len(), "Round committed");
      Ok(RoundExecution::Committed { orders_placed })
    } else {
      debug!("Round was no longer pending");
      Ok(RoundExecution::AlreadyAdvanced)
    }
  }

  /// Every member's identity, or the missing fields of every blocked member.
  fn identities(&self, members: &[RoundMember]) -> Result<Vec<MemberIdentity>, Vec<(String, Vec<&'static str>)>> {
    let mut identities = Vec::with_capacity(members.len());
    let mut missing = Vec::new();
    for member in members {
      match member.identity(self.require_credentials) {
        Ok(id) => identities.push(id),
        Err(fields) => missing.push((member.user_id.clone(), fields)),
      }
    }
    if missing.is_empty() { Ok(identities) } else { Err(missing) }
  }
}
