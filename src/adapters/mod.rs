//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, the remote signer, PostgreSQL).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `api`: order book exchange REST client, auth and order signing
//! - `normalize`: tolerant readers for loosely shaped JSON responses
//! - `persistence`: PostgreSQL and in-memory repositories
//! - `signer`: stamped client and digest signer for the custodial service

pub mod api;
pub mod normalize;
pub mod persistence;
pub mod signer;
