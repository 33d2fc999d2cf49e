//! Database rows for rounds, members and ledger entries.
//!
//! Rows mirror the column layout of `migrations/0001_round_settlement.sql`
//! and convert into domain types; nothing outside this adapter sees them.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::ledger::{LedgerEntry, LedgerEntryType};
use crate::domain::round::{ApiCredentials, OrderFields, Round, RoundMember, RoundStatus, TradingProfile};

/// Column list selected for rounds.
pub const ROUND_COLUMNS: &str = "id, club_id, target_outcome, target_token_id, condition_id, status, \
     resolved_outcome, resolved_at, settled_at, stake_total, created_at";

/// Column list selected for ledger entries.
pub const LEDGER_COLUMNS: &str =
    "id, safe_address, club_id, user_id, round_id, entry_type, amount, asset, tx_hash, metadata, created_at";

/// A row from `rounds`.
#[derive(Debug, Clone, FromRow)]
pub struct RoundRow {
    pub id: String,
    pub club_id: String,
    pub target_outcome: Option<String>,
    pub target_token_id: Option<String>,
    pub condition_id: Option<String>,
    pub status: String,
    pub resolved_outcome: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub stake_total: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RoundRow> for Round {
    type Error = anyhow::Error;

    fn try_from(row: RoundRow) -> Result<Self> {
        let status: RoundStatus = row.status.parse().map_err(|e: String| anyhow!(e))?;
        Ok(Self {
            stake_total: u64::try_from(row.stake_total)
                .with_context(|| format!("round {} has negative stake_total", row.id))?,
            id: row.id,
            club_id: row.club_id,
            target_outcome: row.target_outcome,
            target_token_id: row.target_token_id,
            condition_id: row.condition_id,
            status,
            resolved_outcome: row.resolved_outcome,
            resolved_at: row.resolved_at,
            settled_at: row.settled_at,
            created_at: row.created_at,
        })
    }
}

/// A `round_members` row left-joined with `trading_wallets`.
#[derive(Debug, Clone, FromRow)]
pub struct MemberRow {
    pub id: String,
    pub round_id: String,
    pub user_id: String,
    pub commit_amount: i64,
    pub payout_amount: i64,
    pub pnl_amount: i64,
    pub settled_at: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
    pub order_status: Option<String>,
    pub order_side: Option<String>,
    pub order_price: Option<Decimal>,
    pub order_size: Option<Decimal>,
    pub order_size_matched: Option<Decimal>,
    pub order_type: Option<String>,
    pub order_outcome: Option<String>,
    pub order_created_at: Option<DateTime<Utc>>,
    pub order_tx_hashes: Option<Vec<String>>,
    pub order_making_amount: Option<Decimal>,
    pub order_taking_amount: Option<Decimal>,
    pub wallet_active: Option<bool>,
    pub safe_address: Option<String>,
    pub signer_address: Option<String>,
    pub signer_organization_id: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
    pub signature_type: Option<i16>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<MemberRow> for RoundMember {
    type Error = anyhow::Error;

    fn try_from(row: MemberRow) -> Result<Self> {
        let credentials = match (present(row.api_key), present(row.api_secret), present(row.api_passphrase)) {
            (Some(api_key), Some(secret), Some(passphrase)) => Some(ApiCredentials {
                api_key,
                secret,
                passphrase,
            }),
            _ => None,
        };

        Ok(Self {
            commit_amount: u64::try_from(row.commit_amount)
                .with_context(|| format!("member {} has negative commit_amount", row.id))?,
            payout_amount: u64::try_from(row.payout_amount)
                .with_context(|| format!("member {} has negative payout_amount", row.id))?,
            id: row.id,
            round_id: row.round_id,
            user_id: row.user_id,
            pnl_amount: row.pnl_amount,
            settled_at: row.settled_at,
            order: OrderFields {
                order_id: row.order_id,
                status: row.order_status,
                side: row.order_side,
                price: row.order_price,
                size: row.order_size,
                size_matched: row.order_size_matched,
                order_type: row.order_type,
                outcome: row.order_outcome,
                created_at: row.order_created_at,
                transaction_hashes: row.order_tx_hashes.unwrap_or_default(),
                making_amount: row.order_making_amount,
                taking_amount: row.order_taking_amount,
            },
            trading: TradingProfile {
                wallet_active: row.wallet_active.unwrap_or(false),
                safe_address: row.safe_address,
                signer_address: row.signer_address,
                signer_organization_id: row.signer_organization_id,
                credentials,
                signature_type: row
                    .signature_type
                    .and_then(|t| u8::try_from(t).ok())
                    .unwrap_or(2),
            },
        })
    }
}

/// A row from `ledger_entries`.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    pub id: Uuid,
    pub safe_address: String,
    pub club_id: String,
    pub user_id: String,
    pub round_id: Option<String>,
    pub entry_type: String,
    pub amount: i64,
    pub asset: String,
    pub tx_hash: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = anyhow::Error;

    fn try_from(row: LedgerRow) -> Result<Self> {
        let entry_type: LedgerEntryType = row.entry_type.parse().map_err(|e: String| anyhow!(e))?;
        Ok(Self {
            id: row.id,
            safe_address: row.safe_address,
            club_id: row.club_id,
            user_id: row.user_id,
            round_id: row.round_id,
            entry_type,
            amount: row.amount,
            asset: row.asset,
            tx_hash: row.tx_hash,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_row() -> MemberRow {
        MemberRow {
            id: "m1".into(),
            round_id: "r1".into(),
            user_id: "u1".into(),
            commit_amount: 100,
            payout_amount: 0,
            pnl_amount: 0,
            settled_at: None,
            order_id: None,
            order_status: None,
            order_side: None,
            order_price: None,
            order_size: None,
            order_size_matched: None,
            order_type: None,
            order_outcome: None,
            order_created_at: None,
            order_tx_hashes: None,
            order_making_amount: None,
            order_taking_amount: None,
            wallet_active: None,
            safe_address: None,
            signer_address: None,
            signer_organization_id: None,
            api_key: Some("k".into()),
            api_secret: Some(" ".into()),
            api_passphrase: Some("p".into()),
            signature_type: None,
        }
    }

    #[test]
    fn test_member_without_wallet_row_is_inactive() {
        let member = RoundMember::try_from(member_row()).unwrap();
        assert!(!member.trading.wallet_active);
        assert!(member.trading.credentials.is_none());
        assert_eq!(member.trading.signature_type, 2);
    }

    #[test]
    fn test_negative_commit_rejected() {
        let row = MemberRow {
            commit_amount: -1,
            ..member_row()
        };
        assert!(RoundMember::try_from(row).is_err());
    }

    #[test]
    fn test_unknown_round_status_rejected() {
        let row = RoundRow {
            id: "r1".into(),
            club_id: "c1".into(),
            target_outcome: None,
            target_token_id: None,
            condition_id: None,
            status: "VOID".into(),
            resolved_outcome: None,
            resolved_at: None,
            settled_at: None,
            stake_total: 0,
            created_at: Utc::now(),
        };
        assert!(Round::try_from(row).is_err());
    }
}
