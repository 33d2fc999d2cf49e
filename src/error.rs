//! Error Taxonomy - Typed Failures Surfaced by the Worker
//!
//! Ports and use cases return `anyhow::Result`; these enums are the
//! concrete failures wrapped inside. Callers that need to branch on a
//! failure kind use `anyhow::Error::downcast_ref`.

use thiserror::Error;

/// Failures of the remote signing adapter.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Public key bytes are not a valid compressed P-256 point.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Every identity candidate and payload encoding was rejected.
    #[error("signing exhausted after {attempts} attempts: {last_error}")]
    SigningExhausted {
        /// Number of (identity, encoding) combinations tried.
        attempts: usize,
        /// Error text of the final attempt.
        last_error: String,
    },

    /// The signer answered but no `r`/`s`/`v` or signature string was found.
    #[error("signature fields missing from signer response")]
    MissingSignature,

    /// Signature fields were present but could not be parsed.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Digest was not 32 bytes of hex.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

/// Failures of the exchange client facade.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Commit amount converts to a non-positive notional.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The exchange refused the order.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// The exchange accepted the request but the response lacks required data.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Not enough ask-side depth to fill a market buy.
    #[error("no liquidity for token {token_id}")]
    NoLiquidity {
        /// Instrument that could not be filled.
        token_id: String,
    },

    /// Member is missing a field required to trade.
    #[error("member not tradable: {0}")]
    MissingIdentity(String),
}

/// Failures of the settlement phase.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// At least one member has no derivable payout amount.
    #[error("missing payout data for round {round_id}: users {user_ids:?}")]
    MissingPayoutData {
        /// Round being settled.
        round_id: String,
        /// Members whose payout could not be determined.
        user_ids: Vec<String>,
    },
}

/// Ledger entries that violate the sign convention of their type.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Amount sign does not match the entry type.
    #[error("{entry_type} entry must have {expected} amount, got {amount}")]
    InvalidSign {
        /// Entry type text.
        entry_type: &'static str,
        /// Expected sign description.
        expected: &'static str,
        /// Offending amount.
        amount: i64,
    },
}

/// Fatal startup configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    /// A configured value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_carries_last_error() {
        let err = SigningError::SigningExhausted {
            attempts: 6,
            last_error: "activity failed".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("6 attempts"));
        assert!(text.contains("activity failed"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = ExchangeError::OrderRejected("not enough balance".into()).into();
        let err = err.context("placing order for member m1");
        assert!(matches!(
            err.downcast_ref::<ExchangeError>(),
            Some(ExchangeError::OrderRejected(_))
        ));
    }
}
