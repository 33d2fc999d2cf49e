//! Polymarket CLOB API Adapter
//!
//! Implements the exchange facade over the Polymarket Central Limit
//! Order Book (CLOB) REST API: member order placement, order lookup and
//! market resolution.
//!
//! Sub-modules:
//! - `auth`: HMAC-SHA256 L2/builder headers and L1 headers
//! - `client`: HTTP client with retries
//! - `eip712`: order and auth typed-data digests
//! - `markets`: resolution heuristic
//! - `orderbook`: ask-side walk for market buy pricing
//! - `orders`: `Exchange` port implementation
//! - `types`: API request/response type definitions

pub mod auth;
pub mod client;
pub mod eip712;
pub mod markets;
pub mod orderbook;
pub mod orders;
pub mod types;

pub use client::{ClobClient, ClobClientConfig};
pub use orders::{ClobExchange, ExchangeSettings};
