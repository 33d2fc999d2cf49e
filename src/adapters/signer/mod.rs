//! Remote Signing Adapter
//!
//! Turns a 32-byte digest into a recoverable signature by delegating to
//! a remote custodial key-management service.
//!
//! Sub-modules:
//! - `point`: P-256 public key decompression
//! - `stamp`: operator key request stamping (`X-Stamp`)
//! - `client`: stamped HTTP transport implementing `SignerApi`
//! - `remote`: candidate/encoding attempts and key-handle cache

pub mod client;
pub mod point;
pub mod remote;
pub mod stamp;

pub use client::TurnkeyClient;
pub use point::decompress_public_key;
pub use remote::RemoteSigner;
pub use stamp::ApiKeyStamper;
