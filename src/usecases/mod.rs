//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the worker's workflows. Each use case is a self-contained
//! business operation.
//!
//! Use cases:
//! - `ExecutionPhase`: PENDING rounds get one order per member
//! - `SettlementPhase`: COMMITTED rounds get payouts once resolved
//! - `LedgerService`: deposits, balances, exposure and performance
//! - `Poller`: the interval loop driving both phases

pub mod execution;
pub mod poller;
pub mod reconciliation;
pub mod settlement;

pub use execution::ExecutionPhase;
pub use poller::{Poller, PollerSettings};
pub use reconciliation::LedgerService;
pub use settlement::SettlementPhase;
