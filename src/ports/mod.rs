//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use cases require from the
//! outside world. Adapters implement these traits; tests inject fakes.
//!
//! Port categories:
//! - `Exchange`: order placement and market resolution
//! - `SignerApi` / `DigestSigner`: remote custodial signing
//! - `RoundRepository` / `LedgerRepository`: the shared relational store

pub mod exchange;
pub mod repository;
pub mod signer;
