//! Ledger domain - append-only monetary facts and the figures derived from them.
//!
//! Entries are never mutated or deleted. Balances are plain sums; the
//! exposure timeline and window performance are pure replays over a
//! slice of entries, so they are testable without a store.
//!
//! Sign convention (relative to the member's wallet):
//! - `DEPOSIT` positive, `WITHDRAW` negative
//! - `COMMIT` negative (funds leave the wallet for a round)
//! - `PAYOUT` positive (funds come back from a round)
//! - `ADJUSTMENT` any non-zero amount

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::round::{ClubId, RoundId, UserId};
use crate::error::LedgerError;

/// Settlement currency symbol written on every entry by this worker.
pub const DEFAULT_ASSET: &str = "USDC";

/// Kind of monetary movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    /// External funds into the vault.
    Deposit,
    /// External funds out of the vault.
    Withdraw,
    /// Stake moved into a round.
    Commit,
    /// Round proceeds credited back.
    Payout,
    /// Manual correction.
    Adjustment,
}

impl LedgerEntryType {
    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdraw => "WITHDRAW",
            Self::Commit => "COMMIT",
            Self::Payout => "PAYOUT",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    /// Deposits and withdrawals cross the vault boundary.
    pub const fn is_external_flow(self) -> bool {
        matches!(self, Self::Deposit | Self::Withdraw)
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(Self::Deposit),
            "WITHDRAW" => Ok(Self::Withdraw),
            "COMMIT" => Ok(Self::Commit),
            "PAYOUT" => Ok(Self::Payout),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            other => Err(format!("unknown ledger entry type {other}")),
        }
    }
}

/// An entry about to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    /// Safe / account address the movement belongs to.
    pub safe_address: String,
    /// Club.
    pub club_id: ClubId,
    /// User.
    pub user_id: UserId,
    /// Round, absent for deposits and withdrawals.
    pub round_id: Option<RoundId>,
    /// Movement kind.
    pub entry_type: LedgerEntryType,
    /// Signed amount in smallest units.
    pub amount: i64,
    /// Asset symbol.
    pub asset: String,
    /// On-chain transaction, if any.
    pub tx_hash: Option<String>,
    /// Free-form context.
    pub metadata: Option<serde_json::Value>,
}

impl NewLedgerEntry {
    /// A deposit of `amount` smallest units.
    pub fn deposit(safe_address: &str, club_id: &str, user_id: &str, amount: i64, tx_hash: Option<String>) -> Self {
        Self {
            safe_address: safe_address.to_string(),
            club_id: club_id.to_string(),
            user_id: user_id.to_string(),
            round_id: None,
            entry_type: LedgerEntryType::Deposit,
            amount,
            asset: DEFAULT_ASSET.to_string(),
            tx_hash,
            metadata: None,
        }
    }

    /// A withdrawal of `amount` smallest units, stored negative.
    pub fn withdrawal(safe_address: &str, club_id: &str, user_id: &str, amount: i64, tx_hash: Option<String>) -> Self {
        Self {
            entry_type: LedgerEntryType::Withdraw,
            amount: -amount.saturating_abs(),
            ..Self::deposit(safe_address, club_id, user_id, 0, tx_hash)
        }
    }

    /// A round payout credit.
    pub fn payout(safe_address: &str, club_id: &str, user_id: &str, round_id: &str, amount: i64) -> Self {
        Self {
            safe_address: safe_address.to_string(),
            club_id: club_id.to_string(),
            user_id: user_id.to_string(),
            round_id: Some(round_id.to_string()),
            entry_type: LedgerEntryType::Payout,
            amount,
            asset: DEFAULT_ASSET.to_string(),
            tx_hash: None,
            metadata: None,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check the amount sign against the entry type.
    ///
    /// # Errors
    /// [`LedgerError::InvalidSign`] when the sign convention is violated.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let (ok, expected) = match self.entry_type {
            LedgerEntryType::Deposit | LedgerEntryType::Payout => (self.amount > 0, "positive"),
            LedgerEntryType::Withdraw | LedgerEntryType::Commit => (self.amount < 0, "negative"),
            LedgerEntryType::Adjustment => (self.amount != 0, "non-zero"),
        };
        if ok {
            Ok(())
        } else {
            Err(LedgerError::InvalidSign {
                entry_type: self.entry_type.as_str(),
                expected,
                amount: self.amount,
            })
        }
    }
}

/// A persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id.
    pub id: Uuid,
    /// Safe / account address.
    pub safe_address: String,
    /// Club.
    pub club_id: ClubId,
    /// User.
    pub user_id: UserId,
    /// Round, if any.
    pub round_id: Option<RoundId>,
    /// Movement kind.
    pub entry_type: LedgerEntryType,
    /// Signed amount in smallest units.
    pub amount: i64,
    /// Asset symbol.
    pub asset: String,
    /// On-chain transaction, if any.
    pub tx_hash: Option<String>,
    /// Free-form context.
    pub metadata: Option<serde_json::Value>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Materialise a new entry with a fresh id.
    pub fn from_new(entry: NewLedgerEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            safe_address: entry.safe_address,
            club_id: entry.club_id,
            user_id: entry.user_id,
            round_id: entry.round_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            asset: entry.asset,
            tx_hash: entry.tx_hash,
            metadata: entry.metadata,
            created_at,
        }
    }
}

/// Sum of amounts.
pub fn balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries.into_iter().fold(0i64, |acc, e| acc.saturating_add(e.amount))
}

// ────────────────────────────────────────────
// Exposure replay
// ────────────────────────────────────────────

/// Wallet vs market exposure after one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposurePoint {
    /// Entry that produced this point.
    pub entry_id: Uuid,
    /// Entry timestamp.
    pub at: DateTime<Utc>,
    /// Funds sitting in the wallet.
    pub wallet: i64,
    /// Funds committed to rounds not yet paid out.
    pub market: i64,
}

impl ExposurePoint {
    /// Net asset value at this point.
    pub const fn nav(&self) -> i64 {
        self.wallet.saturating_add(self.market)
    }
}

#[derive(Debug, Default)]
struct ExposureState {
    wallet: i64,
    market: i64,
    open_by_round: HashMap<Option<RoundId>, i64>,
}

impl ExposureState {
    fn apply(&mut self, entry: &LedgerEntry) {
        let magnitude = entry.amount.saturating_abs();
        match entry.entry_type {
            LedgerEntryType::Commit => {
                self.wallet = self.wallet.saturating_sub(magnitude);
                self.market = self.market.saturating_add(magnitude);
                let open = self.open_by_round.entry(entry.round_id.clone()).or_default();
                *open = open.saturating_add(magnitude);
            }
            LedgerEntryType::Payout => {
                self.wallet = self.wallet.saturating_add(magnitude);
                let closed = if entry.round_id.is_some() {
                    self.open_by_round.remove(&entry.round_id).unwrap_or(0)
                } else {
                    0
                };
                self.market = self.market.saturating_sub(closed);
            }
            LedgerEntryType::Deposit | LedgerEntryType::Withdraw | LedgerEntryType::Adjustment => {
                self.wallet = self.wallet.saturating_add(entry.amount);
            }
        }
    }

    const fn nav(&self) -> i64 {
        self.wallet.saturating_add(self.market)
    }
}

fn sorted_by_time(entries: &[LedgerEntry]) -> Vec<&LedgerEntry> {
    let mut sorted: Vec<&LedgerEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.created_at);
    sorted
}

/// Replay entries in timestamp order and record exposure after each one.
pub fn exposure_timeline(entries: &[LedgerEntry]) -> Vec<ExposurePoint> {
    let mut state = ExposureState::default();
    sorted_by_time(entries)
        .into_iter()
        .map(|entry| {
            state.apply(entry);
            ExposurePoint {
                entry_id: entry.id,
                at: entry.created_at,
                wallet: state.wallet,
                market: state.market,
            }
        })
        .collect()
}

// ────────────────────────────────────────────
// Window performance
// ────────────────────────────────────────────

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

impl Window {
    /// Trailing window of `days` ending at `end`.
    pub fn trailing_days(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - chrono::Duration::days(days),
            end,
        }
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Performance over a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceReport {
    /// NAV before the window opened.
    pub nav_start: i64,
    /// NAV at window end.
    pub nav_end: i64,
    /// Deposits plus withdrawals inside the window.
    pub net_external_flows: i64,
    /// Payouts minus commits inside the window.
    pub realized_pnl: i64,
    /// Absolute commits inside the window.
    pub total_committed: i64,
    /// Fractional return (0.05 = 5%).
    pub return_fraction: Decimal,
    /// Whether any entry falls inside the window.
    pub has_window_activity: bool,
}

/// Compute window performance.
///
/// `(navEnd − navStart − flows) / navStart` when a starting NAV exists,
/// otherwise `realizedPnl / totalCommitted`; zero when the window is empty.
pub fn performance(entries: &[LedgerEntry], window: Window) -> PerformanceReport {
    let mut state = ExposureState::default();
    let mut nav_start = 0i64;
    let mut started = false;
    let mut flows = 0i64;
    let mut payouts = 0i64;
    let mut committed = 0i64;
    let mut activity = false;

    for entry in sorted_by_time(entries) {
        if entry.created_at > window.end {
            break;
        }
        if !started && entry.created_at >= window.start {
            nav_start = state.nav();
            started = true;
        }
        state.apply(entry);

        if window.contains(entry.created_at) {
            activity = true;
            match entry.entry_type {
                t if t.is_external_flow() => flows = flows.saturating_add(entry.amount),
                LedgerEntryType::Commit => committed = committed.saturating_add(entry.amount.saturating_abs()),
                LedgerEntryType::Payout => payouts = payouts.saturating_add(entry.amount),
                _ => {}
            }
        }
    }
    if !started {
        nav_start = state.nav();
    }
    let nav_end = state.nav();
    let realized_pnl = payouts.saturating_sub(committed);

    let return_fraction = if !activity {
        Decimal::ZERO
    } else if nav_start != 0 {
        Decimal::from(nav_end.saturating_sub(nav_start).saturating_sub(flows)) / Decimal::from(nav_start)
    } else if committed != 0 {
        Decimal::from(realized_pnl) / Decimal::from(committed)
    } else {
        Decimal::ZERO
    };

    PerformanceReport {
        nav_start,
        nav_end,
        net_external_flows: flows,
        realized_pnl,
        total_committed: committed,
        return_fraction,
        has_window_activity: activity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).single().unwrap()
    }

    fn entry(day: u32, entry_type: LedgerEntryType, amount: i64, round: Option<&str>) -> LedgerEntry {
        LedgerEntry::from_new(
            NewLedgerEntry {
                safe_address: "0xsafe".into(),
                club_id: "club".into(),
                user_id: "u1".into(),
                round_id: round.map(String::from),
                entry_type,
                amount,
                asset: DEFAULT_ASSET.into(),
                tx_hash: None,
                metadata: None,
            },
            at(day),
        )
    }

    #[test]
    fn test_sign_convention_validation() {
        assert!(NewLedgerEntry::deposit("s", "c", "u", 10, None).validate().is_ok());
        assert!(NewLedgerEntry::deposit("s", "c", "u", -10, None).validate().is_err());
        assert_eq!(NewLedgerEntry::withdrawal("s", "c", "u", 10, None).amount, -10);
        assert!(NewLedgerEntry::payout("s", "c", "u", "r", 0).validate().is_err());
    }

    #[test]
    fn test_performance_saturates_on_extreme_ledger() {
        let entries = vec![
            entry(1, LedgerEntryType::Withdraw, -i64::MAX, None),
            entry(3, LedgerEntryType::Deposit, i64::MAX, None),
            entry(4, LedgerEntryType::Deposit, i64::MAX, None),
        ];
        let report = performance(&entries, Window { start: at(2), end: at(5) });
        assert_eq!(report.nav_start, -i64::MAX);
        assert_eq!(report.nav_end, i64::MAX);
        assert_eq!(report.net_external_flows, i64::MAX);
        assert!(report.return_fraction.is_zero());
    }

    #[test]
    fn test_balance_is_sum() {
        let entries = vec![
            entry(1, LedgerEntryType::Deposit, 1_000, None),
            entry(2, LedgerEntryType::Commit, -400, Some("r1")),
            entry(3, LedgerEntryType::Payout, 600, Some("r1")),
        ];
        assert_eq!(balance(&entries), 1_200);
    }

    #[test]
    fn test_exposure_moves_between_wallet_and_market() {
        let entries = vec![
            entry(3, LedgerEntryType::Payout, 600, Some("r1")),
            entry(1, LedgerEntryType::Deposit, 1_000, None),
            entry(2, LedgerEntryType::Commit, -400, Some("r1")),
        ];
        let timeline = exposure_timeline(&entries);
        let shape: Vec<(i64, i64)> = timeline.iter().map(|p| (p.wallet, p.market)).collect();
        assert_eq!(shape, vec![(1_000, 0), (600, 400), (1_200, 0)]);
        assert_eq!(timeline[1].nav(), 1_000);
    }

    #[test]
    fn test_performance_uses_starting_nav() {
        let entries = vec![
            entry(1, LedgerEntryType::Deposit, 1_000, None),
            entry(5, LedgerEntryType::Commit, -400, Some("r1")),
            entry(6, LedgerEntryType::Payout, 600, Some("r1")),
            entry(7, LedgerEntryType::Deposit, 500, None),
        ];
        let report = performance(&entries, Window { start: at(4), end: at(8) });
        assert!(report.has_window_activity);
        assert_eq!(report.nav_start, 1_000);
        assert_eq!(report.nav_end, 1_700);
        assert_eq!(report.net_external_flows, 500);
        assert_eq!(report.return_fraction, dec!(0.2));
    }

    #[test]
    fn test_performance_falls_back_to_realized_without_start_nav() {
        let entries = vec![
            entry(5, LedgerEntryType::Deposit, 1_000, None),
            entry(5, LedgerEntryType::Commit, -400, Some("r1")),
            entry(6, LedgerEntryType::Payout, 500, Some("r1")),
        ];
        let report = performance(&entries, Window { start: at(4), end: at(8) });
        assert_eq!(report.nav_start, 0);
        assert_eq!(report.realized_pnl, 100);
        assert_eq!(report.return_fraction, dec!(0.25));
    }

    #[test]
    fn test_empty_window_reports_no_activity() {
        let entries = vec![entry(1, LedgerEntryType::Deposit, 1_000, None)];
        let report = performance(&entries, Window { start: at(4), end: at(8) });
        assert!(!report.has_window_activity);
        assert_eq!(report.return_fraction, Decimal::ZERO);
        assert_eq!(report.nav_start, 1_000);
        assert_eq!(report.nav_end, 1_000);
    }
}
