//! Persistence Adapters - Shared Relational Store
//!
//! Implements the repository ports against the PostgreSQL database shared
//! with the indexer and the web app, plus an in-memory store with the
//! same write guards for tests and dry runs.

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;
