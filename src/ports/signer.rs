//! Signer Ports - Remote Custodial Signing Interfaces
//!
//! `SignerApi` is the raw transport to the custodial key-management
//! service (stamped HTTP in production, mocks in tests). `DigestSigner`
//! is what the exchange adapter consumes: a 32-byte digest in, a 65-byte
//! recoverable signature out.

use alloy::primitives::B256;
use async_trait::async_trait;
use serde_json::Value;

/// A 65-byte `r || s || v` signature with `v` in Ethereum form (27/28).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    /// `r` component, big-endian.
    pub r: [u8; 32],
    /// `s` component, big-endian.
    pub s: [u8; 32],
    /// Recovery id, 27 or 28.
    pub v: u8,
}

impl RecoverableSignature {
    /// Concatenated `r || s || v`.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// `0x`-prefixed lowercase hex of [`Self::to_bytes`].
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

/// Which wallet to sign with, as known to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignerIdentity {
    /// Remote organization owning the key.
    pub organization_id: String,
    /// Wallet address of the key.
    pub wallet_address: String,
}

/// Transport to the remote custodial signer.
///
/// Responses are returned as untyped JSON; normalisation happens in the
/// signing adapter so the shape never leaks further.
#[async_trait]
pub trait SignerApi: Send + Sync + 'static {
    /// Request a raw-payload signature with no further hashing.
    async fn sign_raw_payload(
        &self,
        organization_id: &str,
        sign_with: &str,
        payload: &str,
    ) -> anyhow::Result<Value>;

    /// List the organization's private keys.
    async fn list_private_keys(&self, organization_id: &str) -> anyhow::Result<Value>;

    /// List the organization's wallet accounts.
    async fn list_wallet_accounts(&self, organization_id: &str) -> anyhow::Result<Value>;
}

/// Produces recoverable secp256k1 signatures over prepared digests.
#[async_trait]
pub trait DigestSigner: Send + Sync + 'static {
    /// Sign a 32-byte digest with the identity's wallet.
    async fn sign_digest(&self, identity: &SignerIdentity, digest: B256) -> anyhow::Result<RecoverableSignature>;
}
