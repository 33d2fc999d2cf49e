//! Domain layer - Core business types and pure computations.
//!
//! Rounds, members, ledger entries and the arithmetic over them.
//! No I/O here (hexagonal architecture inner ring); everything is
//! serializable and testable in isolation.

pub mod ledger;
pub mod round;
pub mod units;

// Re-export core types for convenience
pub use ledger::{LedgerEntry, LedgerEntryType, NewLedgerEntry, PerformanceReport, Window};
pub use round::{
    ApiCredentials, MarketResolution, MemberIdentity, MemberPayout, OrderFields, Round,
    RoundMember, RoundStatus, TradingProfile,
};
