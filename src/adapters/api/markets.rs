//! Market Resolution Heuristic
//!
//! Exchange market answers are inconsistent in which fields they fill, so
//! resolution is read from several signals checked in a fixed order. Any
//! doubt yields "unresolved"; settlement simply waits for the next poll.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::adapters::normalize::MarketSnapshot;
use crate::domain::round::MarketResolution;

/// Token price treated as a settled outcome.
const SETTLEMENT_PRICE: Decimal = dec!(0.999);

/// Status strings that mean the market is done.
const TERMINAL_STATUSES: &[&str] = &["resolved", "settled", "final", "closed"];

/// Which signal decided that a market resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSignal {
    /// Explicit resolved/settled/finalized flag or terminal status text.
    Explicit,
    /// A token flagged as winner.
    WinnerToken,
    /// Closed and no longer accepting orders.
    ClosedNotAccepting,
    /// Closed with a token at the settlement price.
    SettlementPrice,
}

/// `0x` followed by exactly 64 hex digits.
pub fn is_valid_condition_id(condition_id: &str) -> bool {
    condition_id
        .strip_prefix("0x")
        .is_some_and(|d| d.len() == 64 && d.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// First signal that marks the market resolved, in tie-break order.
pub fn resolution_signal(market: &MarketSnapshot) -> Option<ResolutionSignal> {
    let status_terminal = market
        .status
        .as_deref()
        .is_some_and(|s| TERMINAL_STATUSES.contains(&s.trim().to_ascii_lowercase().as_str()));
    let closed = market.closed == Some(true);

    if market.resolved_flag == Some(true) || status_terminal {
        Some(ResolutionSignal::Explicit)
    } else if market.tokens.iter().any(|t| t.winner) {
        Some(ResolutionSignal::WinnerToken)
    } else if closed && market.accepting_orders == Some(false) {
        Some(ResolutionSignal::ClosedNotAccepting)
    } else if closed && market.tokens.iter().any(|t| t.price.is_some_and(|p| p >= SETTLEMENT_PRICE)) {
        Some(ResolutionSignal::SettlementPrice)
    } else {
        None
    }
}

/// Winning label: winner token, then generic outcome/result fields, then
/// the single token priced at settlement.
pub fn winning_outcome(market: &MarketSnapshot) -> Option<String> {
    if let Some(label) = market.tokens.iter().find(|t| t.winner).and_then(|t| t.outcome.clone()) {
        return Some(label);
    }
    if let Some(label) = market.outcome_field.clone() {
        return Some(label);
    }
    let mut settled = market
        .tokens
        .iter()
        .filter(|t| t.price.is_some_and(|p| p >= SETTLEMENT_PRICE));
    match (settled.next(), settled.next()) {
        (Some(only), None) => only.outcome.clone(),
        _ => None,
    }
}

/// Resolution derived from a market snapshot.
pub fn derive_resolution(market: &MarketSnapshot) -> MarketResolution {
    if resolution_signal(market).is_none() {
        return MarketResolution::unresolved();
    }
    MarketResolution {
        is_resolved: true,
        outcome: winning_outcome(market),
        resolved_at: market.resolved_at,
    }
}
