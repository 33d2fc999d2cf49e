//! PostgreSQL implementation of the round and ledger repositories.
//!
//! Every write is guarded by a predicate on already-written facts
//! (`status = 'PENDING'`, `order_id IS NULL`, existing PAYOUT rows), so a
//! retry after a crash, or a write raced by the indexer, changes nothing.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::models::{LEDGER_COLUMNS, LedgerRow, MemberRow, ROUND_COLUMNS, RoundRow};
use crate::domain::ledger::{LedgerEntry, NewLedgerEntry};
use crate::domain::round::{MarketResolution, MemberId, MemberPayout, OrderFields, Round, RoundId, RoundMember};
use crate::ports::repository::{LedgerFilter, LedgerRepository, RoundRepository, SettleOutcome};

const MEMBER_QUERY: &str = "SELECT m.id, m.round_id, m.user_id, m.commit_amount, m.payout_amount, m.pnl_amount, \
     m.settled_at, m.order_id, m.order_status, m.order_side, m.order_price, m.order_size, \
     m.order_size_matched, m.order_type, m.order_outcome, m.order_created_at, m.order_tx_hashes, \
     m.order_making_amount, m.order_taking_amount, \
     w.is_active AS wallet_active, w.safe_address, w.signer_address, w.signer_organization_id, \
     w.api_key, w.api_secret, w.api_passphrase, w.signature_type \
     FROM round_members m LEFT JOIN trading_wallets w ON w.user_id = m.user_id \
     WHERE m.round_id = $1 ORDER BY m.created_at ASC, m.id ASC";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a pool against `url`; connections open on first use, so an
    /// unreachable database surfaces as a failed poll cycle, not at startup.
    ///
    /// # Errors
    /// When `url` is not a valid connection string.
    pub fn connect_lazy(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .context("Invalid database URL")?;
        Ok(Self::new(pool))
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn list_rounds(&self, status: &str, require_token: bool, batch_size: usize) -> Result<Vec<Round>> {
        let token_clause = if require_token {
            " AND target_token_id IS NOT NULL AND target_token_id <> ''"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE status = $1{token_clause} ORDER BY created_at ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, RoundRow>(&sql)
            .bind(status)
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list {status} rounds"))?;

        rows.into_iter().map(Round::try_from).collect()
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{what} {value} exceeds storage range"))
}

fn push_ledger_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &LedgerFilter) {
    if let Some(user_id) = &filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id.clone());
    }
    if let Some(club_id) = &filter.club_id {
        qb.push(" AND club_id = ").push_bind(club_id.clone());
    }
    if let Some(round_id) = &filter.round_id {
        qb.push(" AND round_id = ").push_bind(round_id.clone());
    }
    if let Some(entry_type) = filter.entry_type {
        qb.push(" AND entry_type = ").push_bind(entry_type.as_str());
    }
    if let Some(from) = filter.from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

#[async_trait]
impl RoundRepository for PgStore {
    async fn list_rounds_to_execute(&self, batch_size: usize) -> Result<Vec<Round>> {
        self.list_rounds("PENDING", true, batch_size).await
    }

    async fn list_rounds_to_settle(&self, batch_size: usize) -> Result<Vec<Round>> {
        self.list_rounds("COMMITTED", false, batch_size).await
    }

    async fn get_round_members(&self, round_id: &RoundId) -> Result<Vec<RoundMember>> {
        let rows = sqlx::query_as::<_, MemberRow>(MEMBER_QUERY)
            .bind(round_id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to load members of round {round_id}"))?;

        rows.into_iter().map(RoundMember::try_from).collect()
    }

    async fn mark_round_committed(&self, round_id: &RoundId) -> Result<bool> {
        let result = sqlx::query("UPDATE rounds SET status = 'COMMITTED' WHERE id = $1 AND status = 'PENDING'")
            .bind(round_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to mark round {round_id} committed"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_member_order(&self, member_id: &MemberId, order: &OrderFields) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE round_members SET order_id = $2, order_status = $3, order_side = $4, order_price = $5, \
             order_size = $6, order_size_matched = $7, order_type = $8, order_outcome = $9, \
             order_created_at = $10, order_tx_hashes = $11, order_making_amount = $12, \
             order_taking_amount = $13 \
             WHERE id = $1 AND order_id IS NULL",
        )
        .bind(member_id)
        .bind(&order.order_id)
        .bind(&order.status)
        .bind(&order.side)
        .bind(order.price)
        .bind(order.size)
        .bind(order.size_matched)
        .bind(&order.order_type)
        .bind(&order.outcome)
        .bind(order.created_at)
        .bind(&order.transaction_hashes)
        .bind(order.making_amount)
        .bind(order.taking_amount)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to persist order for member {member_id}"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_member_fill(&self, member_id: &MemberId, order: &OrderFields) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE round_members SET order_status = $3, order_side = $4, order_price = $5, \
             order_size = $6, order_size_matched = $7, order_type = $8, order_outcome = $9, \
             order_created_at = $10, order_tx_hashes = $11, order_making_amount = $12, \
             order_taking_amount = $13 \
             WHERE id = $1 AND order_id = $2 AND settled_at IS NULL",
        )
        .bind(member_id)
        .bind(&order.order_id)
        .bind(&order.status)
        .bind(&order.side)
        .bind(order.price)
        .bind(order.size)
        .bind(order.size_matched)
        .bind(&order.order_type)
        .bind(&order.outcome)
        .bind(order.created_at)
        .bind(&order.transaction_hashes)
        .bind(order.making_amount)
        .bind(order.taking_amount)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to refresh order fill for member {member_id}"))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, round, members, payouts, resolution), fields(round_id = %round.id))]
    async fn settle_round(
        &self,
        round: &Round,
        members: &[RoundMember],
        payouts: &[MemberPayout],
        resolution: &MarketResolution,
    ) -> Result<SettleOutcome> {
        let by_id: HashMap<&str, &RoundMember> = members.iter().map(|m| (m.id.as_str(), m)).collect();
        let mut outcome = SettleOutcome::default();

        let mut tx = self.pool.begin().await.context("Failed to open settlement transaction")?;

        let paid: HashSet<String> = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM ledger_entries WHERE round_id = $1 AND entry_type = 'PAYOUT'",
        )
        .bind(&round.id)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to read existing payouts")?
        .into_iter()
        .collect();

        for payout in payouts {
            if payout.payout_amount == 0 || paid.contains(&payout.user_id) {
                continue;
            }
            let safe_address = by_id
                .get(payout.member_id.as_str())
                .and_then(|m| m.trading.safe_address.clone())
                .unwrap_or_default();
            let inserted = sqlx::query(
                "INSERT INTO ledger_entries \
                 (id, safe_address, club_id, user_id, round_id, entry_type, amount, asset, metadata, created_at) \
                 VALUES ($1, $2, $3, $4, $5, 'PAYOUT', $6, 'USDC', $7, now()) \
                 ON CONFLICT (round_id, user_id) WHERE entry_type = 'PAYOUT' DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(safe_address)
            .bind(&round.club_id)
            .bind(&payout.user_id)
            .bind(&round.id)
            .bind(to_i64(payout.payout_amount, "payout")?)
            .bind(serde_json::json!({ "outcome": resolution.outcome, "commit_amount": payout.commit_amount }))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert payout for user {}", payout.user_id))?;
            outcome.payouts_inserted += usize::try_from(inserted.rows_affected()).unwrap_or(0);
        }

        for payout in payouts.iter().filter(|p| !p.already_settled) {
            let updated = sqlx::query(
                "UPDATE round_members SET payout_amount = GREATEST(payout_amount, $2), \
                 pnl_amount = GREATEST(payout_amount, $2) - commit_amount, \
                 settled_at = now() WHERE id = $1 AND settled_at IS NULL",
            )
            .bind(&payout.member_id)
            .bind(to_i64(payout.payout_amount, "payout")?)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to settle member {}", payout.member_id))?;
            outcome.members_updated += usize::try_from(updated.rows_affected()).unwrap_or(0);
        }

        let transitioned = sqlx::query(
            "UPDATE rounds SET status = 'SETTLED', \
             resolved_outcome = COALESCE(resolved_outcome, $2), \
             resolved_at = COALESCE(resolved_at, $3, now()), settled_at = now() \
             WHERE id = $1 AND status = 'COMMITTED'",
        )
        .bind(&round.id)
        .bind(&resolution.outcome)
        .bind(resolution.resolved_at)
        .execute(&mut *tx)
        .await
        .context("Failed to mark round settled")?;
        outcome.round_transitioned = transitioned.rows_affected() == 1;

        tx.commit().await.context("Failed to commit settlement")?;

        debug!(
            payouts_inserted = outcome.payouts_inserted,
            members_updated = outcome.members_updated,
            round_transitioned = outcome.round_transitioned,
            "Settlement transaction committed"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn append_entries(&self, entries: &[NewLedgerEntry]) -> Result<Vec<LedgerEntry>> {
        for entry in entries {
            entry.validate()?;
        }

        let mut tx = self.pool.begin().await.context("Failed to open ledger transaction")?;
        let mut stored = Vec::with_capacity(entries.len());

        for entry in entries {
            let row = sqlx::query_as::<_, LedgerRow>(&format!(
                "INSERT INTO ledger_entries \
                 (id, safe_address, club_id, user_id, round_id, entry_type, amount, asset, tx_hash, metadata, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {LEDGER_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(&entry.safe_address)
            .bind(&entry.club_id)
            .bind(&entry.user_id)
            .bind(&entry.round_id)
            .bind(entry.entry_type.as_str())
            .bind(entry.amount)
            .bind(&entry.asset)
            .bind(&entry.tx_hash)
            .bind(&entry.metadata)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("Failed to append {} entry for user {}", entry.entry_type, entry.user_id))?;
            stored.push(LedgerEntry::try_from(row)?);
        }

        tx.commit().await.context("Failed to commit ledger entries")?;
        info!(count = stored.len(), "Ledger entries appended");
        Ok(stored)
    }

    async fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE TRUE"));
        push_ledger_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at ASC, id ASC");

        let rows = qb
            .build_query_as::<LedgerRow>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list ledger entries")?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn sum_amounts(&self, filter: &LedgerFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries WHERE TRUE");
        push_ledger_filter(&mut qb, filter);

        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .context("Failed to sum ledger entries")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::LedgerEntryType;

    #[test]
    fn test_filter_builds_bound_predicates() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM ledger_entries WHERE TRUE");
        let filter = LedgerFilter {
            entry_type: Some(LedgerEntryType::Payout),
            ..LedgerFilter::member("u1", "c1")
        };
        push_ledger_filter(&mut qb, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM ledger_entries WHERE TRUE AND user_id = $1 AND club_id = $2 AND entry_type = $3"
        );
    }

    #[test]
    fn test_amount_range_checked() {
        assert!(to_i64(u64::MAX, "payout").is_err());
        assert_eq!(to_i64(150, "payout").unwrap(), 150);
    }
}
