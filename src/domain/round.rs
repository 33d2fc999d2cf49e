//! Round domain types.
//!
//! A round is one pooled bet on one market outcome. Members commit funds,
//! the worker places one market order per member, and once the market
//! resolves each member is credited a payout. These types are shared by
//! the ports, adapters and use cases; they carry no I/O.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::units;
use crate::error::SettlementError;

// ────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────

/// Round identifier as stored by the web app.
pub type RoundId = String;

/// Club identifier.
pub type ClubId = String;

/// User identifier.
pub type UserId = String;

/// Round membership row identifier.
pub type MemberId = String;

/// Exchange order identifier.
pub type OrderId = String;

// ────────────────────────────────────────────
// Round lifecycle
// ────────────────────────────────────────────

/// Lifecycle status of a round. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    /// Created, orders not yet all placed.
    Pending,
    /// Every member holds an order, or confirmed on-chain by the indexer.
    Committed,
    /// Payouts written; terminal.
    Settled,
}

impl RoundStatus {
    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Committed => "COMMITTED",
            Self::Settled => "SETTLED",
        }
    }

    /// Whether `next` is a legal forward step (one phase at a time).
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Committed) | (Self::Committed, Self::Settled)
        )
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "COMMITTED" => Ok(Self::Committed),
            "SETTLED" => Ok(Self::Settled),
            other => Err(format!("unknown round status {other}")),
        }
    }
}

/// One pooled bet on one external market outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Owning club.
    pub club_id: ClubId,
    /// Outcome label the club is betting on (e.g. "Yes").
    pub target_outcome: Option<String>,
    /// Exchange instrument for the target outcome.
    pub target_token_id: Option<String>,
    /// Exchange market / condition identifier.
    pub condition_id: Option<String>,
    /// Current lifecycle status.
    pub status: RoundStatus,
    /// Winning outcome once known.
    pub resolved_outcome: Option<String>,
    /// When the resolution was observed.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When payouts were written.
    pub settled_at: Option<DateTime<Utc>>,
    /// Sum of member commits, smallest units.
    pub stake_total: u64,
    /// Creation time; batches are processed oldest first.
    pub created_at: DateTime<Utc>,
}

impl Round {
    /// Resolution already persisted on the round, if any.
    pub fn stored_resolution(&self) -> Option<MarketResolution> {
        self.resolved_outcome.as_ref().map(|outcome| MarketResolution {
            is_resolved: true,
            outcome: Some(outcome.clone()),
            resolved_at: self.resolved_at,
        })
    }
}

// ────────────────────────────────────────────
// Members and trading identity
// ────────────────────────────────────────────

/// Long-lived per-member exchange API credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    /// API key.
    pub api_key: String,
    /// Base64url HMAC secret. Never logged.
    pub secret: String,
    /// Passphrase.
    pub passphrase: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Trading fields joined onto a member row. All optional at rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingProfile {
    /// Whether the member's trading wallet is active.
    pub wallet_active: bool,
    /// Funder / safe address that holds collateral (order maker).
    pub safe_address: Option<String>,
    /// Custodial EOA that signs orders.
    pub signer_address: Option<String>,
    /// Remote signer organization holding the EOA key.
    pub signer_organization_id: Option<String>,
    /// Stored exchange API credentials.
    pub credentials: Option<ApiCredentials>,
    /// Exchange signature type (0 = EOA, 1 = proxy, 2 = safe).
    pub signature_type: u8,
}

/// Validated identity handed to the exchange facade.
#[derive(Debug, Clone)]
pub struct MemberIdentity {
    /// Member's user id (for logs).
    pub user_id: UserId,
    /// Order maker / funder address.
    pub maker_address: String,
    /// Order signer address.
    pub signer_address: String,
    /// Remote signer organization.
    pub organization_id: String,
    /// Stored API credentials, if any.
    pub credentials: Option<ApiCredentials>,
    /// Exchange signature type.
    pub signature_type: u8,
}

/// Order metadata persisted on a member once an order exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFields {
    /// Exchange order id. Immutable once set.
    pub order_id: Option<OrderId>,
    /// Exchange status string (e.g. "matched", "live").
    pub status: Option<String>,
    /// "BUY" / "SELL".
    pub side: Option<String>,
    /// Limit price used.
    pub price: Option<Decimal>,
    /// Original size in shares.
    pub size: Option<Decimal>,
    /// Filled shares.
    pub size_matched: Option<Decimal>,
    /// "FOK", "GTC", ...
    pub order_type: Option<String>,
    /// Outcome label of the instrument bought.
    pub outcome: Option<String>,
    /// Exchange-side creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Settlement transaction hashes reported by the exchange.
    pub transaction_hashes: Vec<String>,
    /// Collateral given, as reported on placement.
    pub making_amount: Option<Decimal>,
    /// Shares received, as reported on placement.
    pub taking_amount: Option<Decimal>,
}

impl OrderFields {
    /// Shares actually received: `taking_amount` first, then `size_matched`.
    pub fn filled_shares(&self) -> Option<Decimal> {
        self.taking_amount
            .filter(|d| !d.is_sign_negative())
            .or(self.size_matched.filter(|d| !d.is_sign_negative()))
    }

    /// Merge live order details over these fields.
    ///
    /// Live status and fill data win; the order id and the placement
    /// making/taking amounts are kept. Transaction hashes are unioned.
    #[must_use]
    pub fn merge_live(self, live: Self) -> Self {
        let mut hashes = self.transaction_hashes;
        for h in live.transaction_hashes {
            if !hashes.contains(&h) {
                hashes.push(h);
            }
        }
        Self {
            order_id: self.order_id.or(live.order_id),
            status: live.status.or(self.status),
            side: live.side.or(self.side),
            price: live.price.or(self.price),
            size: live.size.or(self.size),
            size_matched: live.size_matched.or(self.size_matched),
            order_type: live.order_type.or(self.order_type),
            outcome: live.outcome.or(self.outcome),
            created_at: live.created_at.or(self.created_at),
            transaction_hashes: hashes,
            making_amount: self.making_amount.or(live.making_amount),
            taking_amount: self.taking_amount.or(live.taking_amount),
        }
    }
}

/// One member's participation in a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMember {
    /// Membership row id.
    pub id: MemberId,
    /// Round this membership belongs to.
    pub round_id: RoundId,
    /// Member user id.
    pub user_id: UserId,
    /// Committed stake, smallest units.
    pub commit_amount: u64,
    /// Credited payout, smallest units.
    pub payout_amount: u64,
    /// payout − commit.
    pub pnl_amount: i64,
    /// Set exactly once by settlement.
    pub settled_at: Option<DateTime<Utc>>,
    /// Order placed on the member's behalf.
    pub order: OrderFields,
    /// Trading wallet fields.
    pub trading: TradingProfile,
}

impl RoundMember {
    /// Whether an order has already been placed for this member.
    pub fn has_order(&self) -> bool {
        self.order
            .order_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Build the exchange identity, or list the fields that are missing.
    ///
    /// Credentials are only required when `require_credentials` is set;
    /// otherwise the facade derives them through the remote signer.
    pub fn identity(&self, require_credentials: bool) -> Result<MemberIdentity, Vec<&'static str>> {
        let t = &self.trading;
        let mut missing = Vec::new();

        if !t.wallet_active {
            missing.push("active_wallet");
        }
        let safe = non_empty(t.safe_address.as_deref());
        let signer = non_empty(t.signer_address.as_deref());
        let org = non_empty(t.signer_organization_id.as_deref());
        if safe.is_none() {
            missing.push("safe_address");
        }
        if signer.is_none() {
            missing.push("signer_address");
        }
        if org.is_none() {
            missing.push("signer_organization_id");
        }
        if require_credentials && t.credentials.is_none() {
            missing.push("api_credentials");
        }

        match (safe, signer, org) {
            (Some(safe), Some(signer), Some(org)) if missing.is_empty() => Ok(MemberIdentity {
                user_id: self.user_id.clone(),
                maker_address: safe.to_string(),
                signer_address: signer.to_string(),
                organization_id: org.to_string(),
                credentials: t.credentials.clone(),
                signature_type: t.signature_type,
            }),
            _ => Err(missing),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ────────────────────────────────────────────
// Resolution and payouts
// ────────────────────────────────────────────

/// Market resolution derived from the exchange. Not persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarketResolution {
    /// Whether the market has unambiguously resolved.
    pub is_resolved: bool,
    /// Winning outcome label.
    pub outcome: Option<String>,
    /// Resolution time if the exchange reports one.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl MarketResolution {
    /// The fail-closed answer.
    pub const fn unresolved() -> Self {
        Self {
            is_resolved: false,
            outcome: None,
            resolved_at: None,
        }
    }
}

/// Settlement figures for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPayout {
    /// Membership row id.
    pub member_id: MemberId,
    /// Member user id.
    pub user_id: UserId,
    /// Committed stake.
    pub commit_amount: u64,
    /// Credited payout.
    pub payout_amount: u64,
    /// payout − commit.
    pub pnl_amount: i64,
    /// Member was settled by an earlier run.
    pub already_settled: bool,
}

/// Signed difference `payout − commit`, clamped to `i64`.
pub fn pnl(payout: u64, commit: u64) -> i64 {
    let delta = i128::from(payout) - i128::from(commit);
    i64::try_from(delta).unwrap_or(if delta.is_negative() { i64::MIN } else { i64::MAX })
}

fn outcome_matches(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Derive one member's payout, or `None` when it cannot be known yet.
pub fn member_payout(round: &Round, member: &RoundMember, winning_outcome: &str) -> Option<MemberPayout> {
    if member.settled_at.is_some() {
        return Some(MemberPayout {
            member_id: member.id.clone(),
            user_id: member.user_id.clone(),
            commit_amount: member.commit_amount,
            payout_amount: member.payout_amount,
            pnl_amount: member.pnl_amount,
            already_settled: true,
        });
    }

    if !member.has_order() {
        return None;
    }
    let shares = member.order.filled_shares()?;
    let bought = member
        .order
        .outcome
        .as_deref()
        .or(round.target_outcome.as_deref())?;

    let payout_amount = if outcome_matches(bought, winning_outcome) {
        units::to_units(shares)?
    } else {
        0
    };

    Some(MemberPayout {
        member_id: member.id.clone(),
        user_id: member.user_id.clone(),
        commit_amount: member.commit_amount,
        payout_amount,
        pnl_amount: pnl(payout_amount, member.commit_amount),
        already_settled: false,
    })
}

/// Compute payouts for every member, failing if any one is unknown.
///
/// # Errors
/// [`SettlementError::MissingPayoutData`] naming every member whose payout
/// could not be derived; the round must stay COMMITTED for a retry.
pub fn compute_payouts(
    round: &Round,
    members: &[RoundMember],
    winning_outcome: &str,
) -> Result<Vec<MemberPayout>, SettlementError> {
    let mut payouts = Vec::with_capacity(members.len());
    let mut missing = Vec::new();

    for member in members {
        match member_payout(round, member, winning_outcome) {
            Some(p) => payouts.push(p),
            None => missing.push(member.user_id.clone()),
        }
    }

    if missing.is_empty() {
        Ok(payouts)
    } else {
        Err(SettlementError::MissingPayoutData {
            round_id: round.id.clone(),
            user_ids: missing,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_only_advances_one_step() {
        assert!(RoundStatus::Pending.can_advance_to(RoundStatus::Committed));
        assert!(RoundStatus::Committed.can_advance_to(RoundStatus::Settled));
        assert!(!RoundStatus::Pending.can_advance_to(RoundStatus::Settled));
        assert!(!RoundStatus::Settled.can_advance_to(RoundStatus::Committed));
        assert!(!RoundStatus::Committed.can_advance_to(RoundStatus::Pending));
    }

    #[test]
    fn test_status_round_trips_storage_text() {
        for s in [RoundStatus::Pending, RoundStatus::Committed, RoundStatus::Settled] {
            assert_eq!(s.as_str().parse::<RoundStatus>(), Ok(s));
        }
        assert!("VOID".parse::<RoundStatus>().is_err());
    }

    #[test]
    fn test_identity_lists_missing_fields() {
        let mut m = member("r1", "u1", 100);
        m.trading.wallet_active = false;
        m.trading.signer_address = Some("  ".to_string());
        m.trading.credentials = None;

        let missing = m.identity(true).unwrap_err();
        assert_eq!(missing, vec!["active_wallet", "signer_address", "api_credentials"]);

        m.trading.wallet_active = true;
        m.trading.signer_address = Some("0xeoa".to_string());
        let id = m.identity(false).unwrap();
        assert!(id.credentials.is_none());
        assert_eq!(id.signer_address, "0xeoa");
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let m = member("r1", "u1", 100);
        let text = format!("{:?}", m.trading.credentials);
        assert!(!text.contains("c2VjcmV0"));
        assert!(text.contains("key_u1"));
    }

    #[test]
    fn test_winning_member_paid_per_share() {
        let r = round("r1", RoundStatus::Committed);
        let mut m = member("r1", "u1", 100);
        m.order.order_id = Some("0xorder".to_string());
        m.order.taking_amount = Some(dec!(0.00015));

        let p = member_payout(&r, &m, "yes").unwrap();
        assert_eq!(p.payout_amount, 150);
        assert_eq!(p.pnl_amount, 50);
        assert!(!p.already_settled);
    }

    #[test]
    fn test_losing_member_pays_zero() {
        let r = round("r1", RoundStatus::Committed);
        let mut m = member("r1", "u1", 200);
        m.order.order_id = Some("0xorder".to_string());
        m.order.size_matched = Some(dec!(0.0004));
        m.order.outcome = Some("Yes".to_string());

        let p = member_payout(&r, &m, "No").unwrap();
        assert_eq!(p.payout_amount, 0);
        assert_eq!(p.pnl_amount, -200);
    }

    #[test]
    fn test_missing_fill_data_fails_whole_round() {
        let r = round("r1", RoundStatus::Committed);
        let mut known = member("r1", "u1", 100);
        known.order.order_id = Some("0x1".to_string());
        known.order.taking_amount = Some(dec!(0.0001));
        let unknown = member("r1", "u2", 100);

        let err = compute_payouts(&r, &[known, unknown], "Yes").unwrap_err();
        let SettlementError::MissingPayoutData { user_ids, .. } = err;
        assert_eq!(user_ids, vec!["u2".to_string()]);
    }

    #[test]
    fn test_settled_member_reuses_stored_figures() {
        let r = round("r1", RoundStatus::Committed);
        let mut m = member("r1", "u1", 100);
        m.settled_at = Some(Utc::now());
        m.payout_amount = 150;
        m.pnl_amount = 50;

        let p = member_payout(&r, &m, "No").unwrap();
        assert!(p.already_settled);
        assert_eq!(p.payout_amount, 150);
    }

    #[test]
    fn test_pnl_clamps() {
        assert_eq!(pnl(150, 100), 50);
        assert_eq!(pnl(0, u64::MAX), i64::MIN);
    }
}
