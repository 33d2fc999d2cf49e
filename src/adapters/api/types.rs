//! CLOB API Request/Response Types
//!
//! Serialization types for the fixed-shape parts of the Polymarket CLOB
//! REST API. Loosely shaped answers (order placement, order details,
//! markets) go through `adapters::normalize` instead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::units::parse_decimal;

/// Order book level from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookLevel {
  /// Price at this level.
  pub price: String,
  /// Total size at this level.
  pub size: String,
}

impl OrderBookLevel {
  /// `(price, size)` when both parse and are positive.
  pub fn parsed(&self) -> Option<(Decimal, Decimal)> {
    let price = parse_decimal(&self.price)?;
    let size = parse_decimal(&self.size)?;
    (price > Decimal::ZERO && size > Decimal::ZERO).then_some((price, size))
  }
}

/// Order book response from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
  /// Bid levels.
  #[serde(default)]
  pub bids: Vec<OrderBookLevel>,
  /// Ask levels.
  #[serde(default)]
  pub asks: Vec<OrderBookLevel>,
  /// Token ID.
  pub asset_id: Option<String>,
  /// Minimum price increment.
  pub tick_size: Option<String>,
}

/// Signed order as submitted to `POST /order`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrderPayload {
  /// Uniqueness salt.
  pub salt: u64,
  /// Funder address (checksummed).
  pub maker: String,
  /// Signing EOA (checksummed).
  pub signer: String,
  /// Counterparty (zero address).
  pub taker: String,
  /// Outcome token id.
  pub token_id: String,
  /// Collateral given, 6-decimal units.
  pub maker_amount: String,
  /// Shares wanted, 6-decimal units.
  pub taker_amount: String,
  /// Expiry, "0" for none.
  pub expiration: String,
  /// Exchange nonce.
  pub nonce: String,
  /// Fee rate in basis points.
  pub fee_rate_bps: String,
  /// "BUY" / "SELL".
  pub side: String,
  /// 0 = EOA, 1 = proxy, 2 = safe.
  pub signature_type: u8,
  /// 65-byte hex signature.
  pub signature: String,
}

/// Body of `POST /order`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderRequest {
  /// Signed order.
  pub order: SignedOrderPayload,
  /// API key of the owning member.
  pub owner: String,
  /// "FOK" for market orders.
  pub order_type: String,
}

/// Credentials returned by `GET /auth/derive-api-key`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeriveApiKeyResponse {
  /// API key.
  pub api_key: String,
  /// Base64url secret.
  pub secret: String,
  /// Passphrase.
  pub passphrase: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn test_post_order_serialization() {
    let req = PostOrderRequest {
      order: SignedOrderPayload {
        salt: 7,
        maker: "0xmaker".into(),
        signer: "0xsigner".into(),
        taker: "0x0000000000000000000000000000000000000000".into(),
        token_id: "123".into(),
        maker_amount: "1000000".into(),
        taker_amount: "2000000".into(),
        expiration: "0".into(),
        nonce: "0".into(),
        fee_rate_bps: "0".into(),
        side: "BUY".into(),
        signature_type: 2,
        signature: "0xsig".into(),
      },
      owner: "key".into(),
      order_type: "FOK".into(),
    };

    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["orderType"], "FOK");
    assert_eq!(json["order"]["tokenId"], "123");
    assert_eq!(json["order"]["makerAmount"], "1000000");
    assert_eq!(json["order"]["signatureType"], 2);
  }

  #[test]
  fn test_book_levels_parse() {
    let json = r#"{"bids": [], "asks": [{"price": "0.52", "size": "100"}, {"price": "x", "size": "1"}]}"#;
    let book: OrderBookResponse = serde_json::from_str(json).unwrap();
    assert_eq!(book.asks[0].parsed(), Some((dec!(0.52), dec!(100))));
    assert_eq!(book.asks[1].parsed(), None);
  }

  #[test]
  fn test_derive_response_deserialization() {
    let json = r#"{"apiKey": "k", "secret": "s", "passphrase": "p"}"#;
    let resp: DeriveApiKeyResponse = serde_json::from_str(json).unwrap();
    assert_eq!(resp.api_key, "k");
  }
}
