//! Ledger Service - Deposits, Balances and Performance
//!
//! Thin orchestration over the append-only ledger: external flows are
//! recorded as pure inserts, and balances, exposure and window returns
//! are derived from the stored entries by the domain replays.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::domain::ledger::{self, ExposurePoint, LedgerEntry, NewLedgerEntry, PerformanceReport, Window};
use crate::ports::repository::{LedgerFilter, LedgerRepository};

/// Ledger use cases over a [`LedgerRepository`].
pub struct LedgerService<L: LedgerRepository> {
  repo: Arc<L>,
}

impl<L: LedgerRepository> LedgerService<L> {
  /// Create the service over a shared ledger store.
  pub fn new(repo: Arc<L>) -> Self {
    Self { repo }
  }

  /// Record an external deposit of `amount` smallest units.
  #[instrument(skip(self, tx_hash))]
  pub async fn record_deposit(
    &self,
    safe_address: &str,
    club_id: &str,
    user_id: &str,
    amount: u64,
    tx_hash: Option<String>,
  ) -> Result<LedgerEntry> {
    let amount = i64::try_from(amount).with_context(|| format!("deposit {amount} exceeds storage range"))?;
    let entry = NewLedgerEntry::deposit(safe_address, club_id, user_id, amount, tx_hash);
    self.append_one(entry).await
  }

  /// Record an external withdrawal of `amount` smallest units.
  #[instrument(skip(self, tx_hash))]
  pub async fn record_withdrawal(
    &self,
    safe_address: &str,
    club_id: &str,
    user_id: &str,
    amount: u64,
    tx_hash: Option<String>,
  ) -> Result<LedgerEntry> {
    let amount = i64::try_from(amount).with_context(|| format!("withdrawal {amount} exceeds storage range"))?;
    let entry = NewLedgerEntry::withdrawal(safe_address, club_id, user_id, amount, tx_hash);
    self.append_one(entry).await
  }

  /// Append entries after checking every sign convention.
  ///
  /// # Errors
  /// `LedgerError::InvalidSign` (wrapped) if any entry is invalid; nothing
  /// is written in that case.
  pub async fn append_entries(&self, entries: &[NewLedgerEntry]) -> Result<Vec<LedgerEntry>> {
    for entry in entries {
      entry.validate()?;
    }
    let stored = self.repo.append_entries(entries).await?;
    info!(count = stored.len(), "Ledger entries appended");
    Ok(stored)
  }

  async fn append_one(&self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
    self
      .append_entries(std::slice::from_ref(&entry))
      .await?
      .into_iter()
      .next()
      .context("Ledger store returned no entry")
  }

  /// A member's balance within a club.
  pub async fn balance(&self, user_id: &str, club_id: &str) -> Result<i64> {
    self.repo.sum_amounts(&LedgerFilter::member(user_id, club_id)).await
  }

  /// A club's total balance.
  pub async fn club_balance(&self, club_id: &str) -> Result<i64> {
    self.repo.sum_amounts(&LedgerFilter::club(club_id)).await
  }

  /// Wallet vs market exposure after each of a member's entries.
  pub async fn exposure_timeline(&self, user_id: &str, club_id: &str) -> Result<Vec<ExposurePoint>> {
    let entries = self.repo.list_entries(&LedgerFilter::member(user_id, club_id)).await?;
    Ok(ledger::exposure_timeline(&entries))
  }

  /// A club's performance over `window`, replaying all history up to its end.
  pub async fn performance(&self, club_id: &str, window: Window) -> Result<PerformanceReport> {
    let filter = LedgerFilter {
      to: Some(window.end),
      ..LedgerFilter::club(club_id)
    };
    let entries = self.repo.list_entries(&filter).await?;
    Ok(ledger::performance(&entries, window))
  }
}
