//! In-memory implementation of the round and ledger repositories.
//!
//! Applies the same write guards as the PostgreSQL store under a single
//! lock, so a settlement is all-or-nothing here too. Used by tests and
//! local dry runs.

use std::collections::HashSet;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::ledger::{LedgerEntry, LedgerEntryType, NewLedgerEntry, balance};
use crate::domain::round::{
    MarketResolution, MemberId, MemberPayout, OrderFields, Round, RoundId, RoundMember, RoundStatus, pnl,
};
use crate::ports::repository::{LedgerFilter, LedgerRepository, RoundRepository, SettleOutcome};

#[derive(Debug, Default)]
struct State {
    rounds: Vec<Round>,
    members: Vec<RoundMember>,
    ledger: Vec<LedgerEntry>,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a round.
    pub async fn put_round(&self, round: Round) {
        let mut state = self.state.write().await;
        state.rounds.retain(|r| r.id != round.id);
        state.rounds.push(round);
    }

    /// Insert or replace a member.
    pub async fn put_member(&self, member: RoundMember) {
        let mut state = self.state.write().await;
        state.members.retain(|m| m.id != member.id);
        state.members.push(member);
    }

    /// Current copy of a round.
    pub async fn round(&self, round_id: &str) -> Option<Round> {
        self.state.read().await.rounds.iter().find(|r| r.id == round_id).cloned()
    }

    /// Every ledger entry, in insertion order.
    pub async fn ledger(&self) -> Vec<LedgerEntry> {
        self.state.read().await.ledger.clone()
    }

    async fn list_by_status(&self, status: RoundStatus, require_token: bool, batch_size: usize) -> Vec<Round> {
        let state = self.state.read().await;
        let mut rounds: Vec<Round> = state
            .rounds
            .iter()
            .filter(|r| r.status == status)
            .filter(|r| !require_token || r.target_token_id.as_deref().is_some_and(|t| !t.is_empty()))
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.created_at);
        rounds.truncate(batch_size);
        rounds
    }
}

#[async_trait]
impl RoundRepository for InMemoryStore {
    async fn list_rounds_to_execute(&self, batch_size: usize) -> Result<Vec<Round>> {
        Ok(self.list_by_status(RoundStatus::Pending, true, batch_size).await)
    }

    async fn list_rounds_to_settle(&self, batch_size: usize) -> Result<Vec<Round>> {
        Ok(self.list_by_status(RoundStatus::Committed, false, batch_size).await)
    }

    async fn get_round_members(&self, round_id: &RoundId) -> Result<Vec<RoundMember>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|m| m.round_id == *round_id)
            .cloned()
            .collect())
    }

    async fn mark_round_committed(&self, round_id: &RoundId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .rounds
            .iter_mut()
            .find(|r| r.id == *round_id && r.status == RoundStatus::Pending)
        {
            Some(round) => {
                round.status = RoundStatus::Committed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_member_order(&self, member_id: &MemberId, order: &OrderFields) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .members
            .iter_mut()
            .find(|m| m.id == *member_id && m.order.order_id.is_none())
        {
            Some(member) => {
                member.order = order.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_member_fill(&self, member_id: &MemberId, order: &OrderFields) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.members.iter_mut().find(|m| {
            m.id == *member_id && m.settled_at.is_none() && m.order.order_id.is_some() && m.order.order_id == order.order_id
        }) {
            Some(member) => {
                let order_id = member.order.order_id.clone();
                member.order = OrderFields {
                    order_id,
                    ..order.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn settle_round(
        &self,
        round: &Round,
        members: &[RoundMember],
        payouts: &[MemberPayout],
        resolution: &MarketResolution,
    ) -> Result<SettleOutcome> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut outcome = SettleOutcome::default();

        let paid: HashSet<String> = state
            .ledger
            .iter()
            .filter(|e| e.entry_type == LedgerEntryType::Payout && e.round_id.as_deref() == Some(round.id.as_str()))
            .map(|e| e.user_id.clone())
            .collect();

        let mut new_entries = Vec::new();
        for payout in payouts.iter().filter(|p| p.payout_amount > 0 && !paid.contains(&p.user_id)) {
            let Ok(amount) = i64::try_from(payout.payout_amount) else {
                bail!("payout {} exceeds storage range", payout.payout_amount);
            };
            let safe = members
                .iter()
                .find(|m| m.id == payout.member_id)
                .and_then(|m| m.trading.safe_address.clone())
                .unwrap_or_default();
            let entry = NewLedgerEntry::payout(&safe, &round.club_id, &payout.user_id, &round.id, amount)
                .with_metadata(serde_json::json!({ "outcome": resolution.outcome, "commit_amount": payout.commit_amount }));
            new_entries.push(LedgerEntry::from_new(entry, now));
        }
        outcome.payouts_inserted = new_entries.len();
        state.ledger.extend(new_entries);

        for payout in payouts.iter().filter(|p| !p.already_settled) {
            if let Some(member) = state
                .members
                .iter_mut()
                .find(|m| m.id == payout.member_id && m.settled_at.is_none())
            {
                member.payout_amount = member.payout_amount.max(payout.payout_amount);
                member.pnl_amount = pnl(member.payout_amount, member.commit_amount);
                member.settled_at = Some(now);
                outcome.members_updated += 1;
            }
        }

        if let Some(stored) = state
            .rounds
            .iter_mut()
            .find(|r| r.id == round.id && r.status == RoundStatus::Committed)
        {
            stored.status = RoundStatus::Settled;
            if stored.resolved_outcome.is_none() {
                stored.resolved_outcome.clone_from(&resolution.outcome);
            }
            stored.resolved_at = stored.resolved_at.or(resolution.resolved_at).or(Some(now));
            stored.settled_at = Some(now);
            outcome.round_transitioned = true;
        }

        Ok(outcome)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn append_entries(&self, entries: &[NewLedgerEntry]) -> Result<Vec<LedgerEntry>> {
        for entry in entries {
            entry.validate()?;
        }
        let now = Utc::now();
        let stored: Vec<LedgerEntry> = entries
            .iter()
            .cloned()
            .map(|e| LedgerEntry::from_new(e, now))
            .collect();
        self.state.write().await.ledger.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<LedgerEntry> = state.ledger.iter().filter(|e| filter.matches(e)).cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn sum_amounts(&self, filter: &LedgerFilter) -> Result<i64> {
        let state = self.state.read().await;
        Ok(balance(state.ledger.iter().filter(|e| filter.matches(e))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::round::fixtures::{member, round};

    #[tokio::test]
    async fn test_order_written_only_once() {
        let store = InMemoryStore::new();
        store.put_member(member("r1", "u1", 100)).await;
        let first = OrderFields {
            order_id: Some("o1".into()),
            ..OrderFields::default()
        };
        let second = OrderFields {
            order_id: Some("o2".into()),
            ..OrderFields::default()
        };

        assert!(store.update_member_order(&"r1:u1".to_string(), &first).await.unwrap());
        assert!(!store.update_member_order(&"r1:u1".to_string(), &second).await.unwrap());
        let members = store.get_round_members(&"r1".to_string()).await.unwrap();
        assert_eq!(members[0].order.order_id.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn test_fill_refresh_needs_matching_unsettled_order() {
        let store = InMemoryStore::new();
        let mut m = member("r1", "u1", 100);
        m.order.order_id = Some("o1".into());
        store.put_member(m).await;
        let fill = OrderFields {
            order_id: Some("o1".into()),
            size_matched: Some(rust_decimal_macros::dec!(0.0002)),
            ..OrderFields::default()
        };
        let other = OrderFields {
            order_id: Some("o9".into()),
            ..fill.clone()
        };

        assert!(!store.update_member_fill(&"r1:u1".to_string(), &other).await.unwrap());
        assert!(store.update_member_fill(&"r1:u1".to_string(), &fill).await.unwrap());
        let members = store.get_round_members(&"r1".to_string()).await.unwrap();
        assert_eq!(members[0].order, fill);
    }

    #[tokio::test]
    async fn test_settled_pnl_follows_kept_payout() {
        let store = InMemoryStore::new();
        let r = round("r1", RoundStatus::Committed);
        store.put_round(r.clone()).await;
        let mut m = member("r1", "u1", 100);
        m.payout_amount = 200;
        store.put_member(m.clone()).await;
        let payout = MemberPayout {
            member_id: m.id.clone(),
            user_id: m.user_id.clone(),
            commit_amount: 100,
            payout_amount: 150,
            pnl_amount: 50,
            already_settled: false,
        };
        let resolution = MarketResolution {
            is_resolved: true,
            outcome: Some("Yes".into()),
            resolved_at: None,
        };

        store.settle_round(&r, &[m], &[payout], &resolution).await.unwrap();
        let members = store.get_round_members(&"r1".to_string()).await.unwrap();
        assert_eq!(members[0].payout_amount, 200);
        assert_eq!(members[0].pnl_amount, 100);
    }

    #[tokio::test]
    async fn test_commit_only_from_pending() {
        let store = InMemoryStore::new();
        store.put_round(round("r1", RoundStatus::Pending)).await;
        assert!(store.mark_round_committed(&"r1".to_string()).await.unwrap());
        assert!(!store.mark_round_committed(&"r1".to_string()).await.unwrap());
        assert_eq!(store.round("r1").await.unwrap().status, RoundStatus::Committed);
    }

    #[tokio::test]
    async fn test_pending_rounds_need_token_and_come_oldest_first() {
        let store = InMemoryStore::new();
        let mut newer = round("newer", RoundStatus::Pending);
        newer.created_at = Utc::now();
        let mut older = round("older", RoundStatus::Pending);
        older.created_at = newer.created_at - chrono::Duration::minutes(5);
        let mut tokenless = round("tokenless", RoundStatus::Pending);
        tokenless.target_token_id = None;
        for r in [newer, older, tokenless] {
            store.put_round(r).await;
        }

        let ids: Vec<_> = store
            .list_rounds_to_execute(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["older".to_string(), "newer".to_string()]);
        assert_eq!(store.list_rounds_to_execute(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_rejects_wrong_sign() {
        let store = InMemoryStore::new();
        let mut bad = NewLedgerEntry::deposit("0xsafe", "c1", "u1", 100, None);
        bad.amount = -100;
        assert!(store.append_entries(&[bad]).await.is_err());
        assert!(store.ledger().await.is_empty());
    }
}
