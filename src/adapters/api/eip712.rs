//! EIP-712 Typed Data - Exchange Order and L1 Auth Digests
//!
//! Struct hashes are ABI-encoded by hand over 32-byte words and hashed
//! with keccak256; domain separators come from alloy's `Eip712Domain`.
//! The resulting digests are what the remote signer signs.

use alloy::primitives::{Address, B256, U256, keccak256};
use alloy::sol_types::{Eip712Domain, eip712_domain};

/// Exchange order type string.
pub const ORDER_TYPE: &str = "Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,\
uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,\
uint8 signatureType)";

/// L1 auth type string.
pub const CLOB_AUTH_TYPE: &str = "ClobAuth(address address,string timestamp,uint256 nonce,string message)";

/// Fixed attestation text of the L1 auth message.
pub const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

/// Order side as encoded on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    /// Buy outcome shares with collateral.
    Buy = 0,
    /// Sell outcome shares for collateral.
    Sell = 1,
}

impl Side {
    /// Wire text.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Unsigned exchange order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOrder {
    /// Uniqueness salt.
    pub salt: U256,
    /// Funder address.
    pub maker: Address,
    /// Signing EOA.
    pub signer: Address,
    /// Counterparty (zero = public order).
    pub taker: Address,
    /// Outcome token id.
    pub token_id: U256,
    /// Collateral given, 6-decimal units.
    pub maker_amount: U256,
    /// Shares wanted, 6-decimal units.
    pub taker_amount: U256,
    /// Expiry (0 = none).
    pub expiration: U256,
    /// Exchange nonce.
    pub nonce: U256,
    /// Fee rate in basis points.
    pub fee_rate_bps: U256,
    /// Side.
    pub side: Side,
    /// 0 = EOA, 1 = proxy, 2 = safe.
    pub signature_type: u8,
}

fn word_address(a: Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_slice());
    w
}

fn word_u8(v: u8) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[31] = v;
    w
}

fn hash_words(words: &[[u8; 32]]) -> B256 {
    let mut buf = Vec::with_capacity(words.len() * 32);
    for w in words {
        buf.extend_from_slice(w);
    }
    keccak256(&buf)
}

impl ExchangeOrder {
    /// `hashStruct(order)`.
    pub fn struct_hash(&self) -> B256 {
        hash_words(&[
            keccak256(ORDER_TYPE.as_bytes()).0,
            self.salt.to_be_bytes::<32>(),
            word_address(self.maker),
            word_address(self.signer),
            word_address(self.taker),
            self.token_id.to_be_bytes::<32>(),
            self.maker_amount.to_be_bytes::<32>(),
            self.taker_amount.to_be_bytes::<32>(),
            self.expiration.to_be_bytes::<32>(),
            self.nonce.to_be_bytes::<32>(),
            self.fee_rate_bps.to_be_bytes::<32>(),
            word_u8(self.side as u8),
            word_u8(self.signature_type),
        ])
    }
}

/// `hashStruct(ClobAuth)` for credential derivation.
pub fn clob_auth_struct_hash(address: Address, timestamp: &str, nonce: u64) -> B256 {
    hash_words(&[
        keccak256(CLOB_AUTH_TYPE.as_bytes()).0,
        word_address(address),
        keccak256(timestamp.as_bytes()).0,
        U256::from(nonce).to_be_bytes::<32>(),
        keccak256(CLOB_AUTH_MESSAGE.as_bytes()).0,
    ])
}

/// Exchange contract domain.
pub fn exchange_domain(chain_id: u64, exchange: Address) -> Eip712Domain {
    eip712_domain! {
        name: "Polymarket CTF Exchange",
        version: "1",
        chain_id: chain_id,
        verifying_contract: exchange,
    }
}

/// L1 auth domain (no verifying contract).
pub fn clob_auth_domain(chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: "ClobAuthDomain",
        version: "1",
        chain_id: chain_id,
    }
}

/// Final digest `keccak256(0x1901 ‖ domainSeparator ‖ structHash)`.
pub fn signing_digest(domain: &Eip712Domain, struct_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain.separator().as_slice());
    buf.extend_from_slice(struct_hash.as_slice());
    keccak256(&buf)
}
