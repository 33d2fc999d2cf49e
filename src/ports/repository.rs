//! Repository Port - Relational Store Interface
//!
//! Defines the traits the use cases need from the store shared with the
//! indexer and the web app. The worker only ever moves round status
//! forward and only ever inserts ledger rows; every write here is
//! guarded so that "another writer already did this" is harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ledger::{LedgerEntry, LedgerEntryType, NewLedgerEntry};
use crate::domain::round::{
    ClubId, MarketResolution, MemberId, MemberPayout, OrderFields, Round, RoundId, RoundMember, UserId,
};

/// Outcome of the atomic settlement write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettleOutcome {
    /// PAYOUT entries inserted by this call.
    pub payouts_inserted: usize,
    /// Members whose payout/pnl/settled-at were written by this call.
    pub members_updated: usize,
    /// Whether this call moved the round to SETTLED.
    pub round_transitioned: bool,
}

impl SettleOutcome {
    /// True when the call changed nothing.
    pub const fn is_noop(&self) -> bool {
        self.payouts_inserted == 0 && self.members_updated == 0 && !self.round_transitioned
    }
}

/// Trait for round and membership persistence.
#[async_trait]
pub trait RoundRepository: Send + Sync + 'static {
    /// PENDING rounds with a target instrument, oldest first.
    async fn list_rounds_to_execute(&self, batch_size: usize) -> anyhow::Result<Vec<Round>>;

    /// COMMITTED rounds, oldest first.
    async fn list_rounds_to_settle(&self, batch_size: usize) -> anyhow::Result<Vec<Round>>;

    /// Members of a round with their trading profile joined in.
    async fn get_round_members(&self, round_id: &RoundId) -> anyhow::Result<Vec<RoundMember>>;

    /// Move PENDING → COMMITTED. Returns false if the round was not PENDING.
    async fn mark_round_committed(&self, round_id: &RoundId) -> anyhow::Result<bool>;

    /// Persist order fields for a member that has no order yet.
    ///
    /// Returns false (and writes nothing) when an order id is already set.
    async fn update_member_order(&self, member_id: &MemberId, order: &OrderFields) -> anyhow::Result<bool>;

    /// Refresh status and fill details of a member's existing order.
    ///
    /// Only writes when the stored order id equals `order.order_id` and the
    /// member is not settled. The order id itself is never changed.
    async fn update_member_fill(&self, member_id: &MemberId, order: &OrderFields) -> anyhow::Result<bool>;

    /// Atomically write payouts and move the round to SETTLED.
    ///
    /// In one transaction: find members that already have a PAYOUT entry
    /// for this round, insert one PAYOUT entry for each remaining member
    /// with a positive payout, write payout/pnl/settled-at for members not
    /// yet settled, and set the round SETTLED with its resolution.
    async fn settle_round(
        &self,
        round: &Round,
        members: &[RoundMember],
        payouts: &[MemberPayout],
        resolution: &MarketResolution,
    ) -> anyhow::Result<SettleOutcome>;
}

/// Filter for ledger reads. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    /// Restrict to one user.
    pub user_id: Option<UserId>,
    /// Restrict to one club.
    pub club_id: Option<ClubId>,
    /// Restrict to one round.
    pub round_id: Option<RoundId>,
    /// Restrict to one entry type.
    pub entry_type: Option<LedgerEntryType>,
    /// Entries created at or after.
    pub from: Option<DateTime<Utc>>,
    /// Entries created at or before.
    pub to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    /// Entries of one user within one club.
    pub fn member(user_id: &str, club_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            club_id: Some(club_id.to_string()),
            ..Self::default()
        }
    }

    /// All entries of a club.
    pub fn club(club_id: &str) -> Self {
        Self {
            club_id: Some(club_id.to_string()),
            ..Self::default()
        }
    }

    /// Whether `entry` passes this filter.
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == entry.user_id)
            && self.club_id.as_ref().is_none_or(|c| *c == entry.club_id)
            && self.round_id.as_ref().is_none_or(|r| entry.round_id.as_ref() == Some(r))
            && self.entry_type.is_none_or(|t| t == entry.entry_type)
            && self.from.is_none_or(|f| entry.created_at >= f)
            && self.to.is_none_or(|t| entry.created_at <= t)
    }
}

/// Append-only ledger persistence. No update or delete is exposed.
#[async_trait]
pub trait LedgerRepository: Send + Sync + 'static {
    /// Insert entries, returning them as stored.
    async fn append_entries(&self, entries: &[NewLedgerEntry]) -> anyhow::Result<Vec<LedgerEntry>>;

    /// Entries matching a filter, ordered by creation time.
    async fn list_entries(&self, filter: &LedgerFilter) -> anyhow::Result<Vec<LedgerEntry>>;

    /// Sum of amounts matching a filter.
    async fn sum_amounts(&self, filter: &LedgerFilter) -> anyhow::Result<i64>;
}
