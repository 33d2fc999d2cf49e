//! Response Normalization - Shape-Agnostic JSON to Typed Results
//!
//! The remote signer and the exchange both answer with loosely typed JSON
//! whose nesting is not contractually fixed. Everything that walks a raw
//! `serde_json::Value` lives here; the rest of the crate only sees the
//! typed variants produced below.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::round::OrderFields;
use crate::domain::units::parse_decimal;
use crate::error::SigningError;
use crate::ports::signer::RecoverableSignature;

/// Recursion guard for hostile or cyclic-looking payloads.
const MAX_DEPTH: usize = 32;

// ────────────────────────────────────────────
// Generic tree search
// ────────────────────────────────────────────

/// Breadth-first search for the first value stored under any of `keys`.
///
/// Shallow matches win over deep ones; within one object, `keys` are
/// tried in order.
pub fn find_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mut level = vec![value];
    for _ in 0..MAX_DEPTH {
        if level.is_empty() {
            return None;
        }
        for node in level.iter().copied() {
            if let Value::Object(map) = node {
                if let Some(found) = keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null())) {
                    return Some(found);
                }
            }
        }
        level = level.into_iter().flat_map(children).collect();
    }
    None
}

/// First object anywhere in the tree that carries every key in `keys`.
pub fn find_object_with<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Map<String, Value>> {
    fn walk<'a>(value: &'a Value, keys: &[&str], depth: usize) -> Option<&'a Map<String, Value>> {
        if depth > MAX_DEPTH {
            return None;
        }
        if let Value::Object(map) = value {
            if keys.iter().all(|k| map.get(*k).is_some_and(|v| !v.is_null())) {
                return Some(map);
            }
        }
        children(value).find_map(|child| walk(child, keys, depth + 1))
    }
    walk(value, keys, 0)
}

fn children(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => Box::new(std::iter::empty()),
    }
}

/// Scalar as text: strings verbatim, numbers and booleans formatted.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Boolean, accepting `"true"`/`"false"` strings and 0/1.
pub fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        _ => None,
    }
}

/// Decimal from a JSON string or number.
pub fn as_decimal(value: &Value) -> Option<Decimal> {
    as_text(value).and_then(|s| parse_decimal(&s))
}

/// Timestamp from RFC 3339 text or unix seconds / milliseconds.
pub fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = as_text(value)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
        return Some(ts.with_timezone(&Utc));
    }
    let n: i64 = text.parse().ok()?;
    if n > 10_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

fn get_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| map.get(*k).and_then(as_text))
}

fn get_flag(map: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| map.get(*k).and_then(as_flag))
}

/// OR of every flag present under `keys`; `None` when none is present.
fn any_flag(map: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(as_flag))
        .reduce(|a, b| a || b)
}

fn get_decimal(map: &Map<String, Value>, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| map.get(*k).and_then(as_decimal))
}

// ────────────────────────────────────────────
// Signer responses
// ────────────────────────────────────────────

/// Known shapes of a raw-payload signing answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerResponse {
    /// Separate hex components, possibly nested anywhere in the tree.
    Components {
        /// Hex `r`, unpadded.
        r: String,
        /// Hex `s`, unpadded.
        s: String,
        /// Recovery id as returned (hex or decimal text).
        v: Option<String>,
    },
    /// One concatenated `r‖s‖v` hex string.
    Concatenated(String),
    /// The activity was reported as failed or rejected.
    Failed(String),
    /// Nothing usable found.
    Unrecognized,
}

const FAILED_STATUSES: &[&str] = &["ACTIVITY_STATUS_FAILED", "ACTIVITY_STATUS_REJECTED", "FAILED", "REJECTED"];

/// Classify a signer answer.
pub fn classify_signer_response(value: &Value) -> SignerResponse {
    if let Some(map) = find_object_with(value, &["r", "s"]) {
        if let (Some(r), Some(s)) = (get_text(map, &["r"]), get_text(map, &["s"])) {
            return SignerResponse::Components {
                r,
                s,
                v: get_text(map, &["v", "recoveryId", "recovery_id"]),
            };
        }
    }

    if let Some(sig) = find_field(value, &["signature", "signedPayload", "sig"])
        .and_then(Value::as_str)
        .filter(|s| is_hex(strip_0x(s)) && strip_0x(s).len() >= 128)
    {
        return SignerResponse::Concatenated(sig.to_string());
    }

    let status = value
        .get("activity")
        .and_then(|a| a.get("status"))
        .or_else(|| find_field(value, &["status"]))
        .and_then(as_text);
    if let Some(status) = status.filter(|s| FAILED_STATUSES.contains(&s.to_ascii_uppercase().as_str())) {
        return SignerResponse::Failed(status);
    }

    SignerResponse::Unrecognized
}

/// Turn a classified answer into a 65-byte recoverable signature.
///
/// # Errors
/// `MissingSignature` for failed or unrecognized answers,
/// `MalformedSignature` when the fields do not parse.
pub fn normalize_signature(response: SignerResponse) -> Result<RecoverableSignature, SigningError> {
    match response {
        SignerResponse::Components { r, s, v } => {
            let v = v.ok_or_else(|| SigningError::MalformedSignature("recovery id missing".into()))?;
            Ok(RecoverableSignature {
                r: pad_component(&r)?,
                s: pad_component(&s)?,
                v: normalize_v(parse_v(&v)?)?,
            })
        }
        SignerResponse::Concatenated(sig) => {
            let hex_str = strip_0x(&sig);
            if hex_str.len() != 130 {
                return Err(SigningError::MalformedSignature(format!(
                    "expected 65-byte signature, got {} hex chars",
                    hex_str.len()
                )));
            }
            let bytes = hex::decode(hex_str).map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
            let mut r = [0u8; 32];
            let mut s = [0u8; 32];
            r.copy_from_slice(&bytes[..32]);
            s.copy_from_slice(&bytes[32..64]);
            Ok(RecoverableSignature {
                r,
                s,
                v: normalize_v(u64::from(bytes[64]))?,
            })
        }
        SignerResponse::Failed(_) | SignerResponse::Unrecognized => Err(SigningError::MissingSignature),
    }
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Left-pad a hex scalar to 32 bytes.
fn pad_component(component: &str) -> Result<[u8; 32], SigningError> {
    let digits = strip_0x(component.trim());
    if !is_hex(digits) || digits.len() > 64 {
        return Err(SigningError::MalformedSignature(format!("bad component {component}")));
    }
    let padded = format!("{digits:0>64}");
    let bytes = hex::decode(padded).map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Recovery id text: `0x`-hex, plain decimal, then bare hex (`"1b"`).
fn parse_v(text: &str) -> Result<u64, SigningError> {
    let text = text.trim();
    if let Some(hex_digits) = text.strip_prefix("0x") {
        return u64::from_str_radix(hex_digits, 16).map_err(|e| SigningError::MalformedSignature(e.to_string()));
    }
    text.parse::<u64>()
        .or_else(|_| u64::from_str_radix(text, 16))
        .map_err(|e| SigningError::MalformedSignature(format!("recovery id {text}: {e}")))
}

/// Ethereum convention: 0/1 become 27/28; EIP-155 values are folded back.
fn normalize_v(v: u64) -> Result<u8, SigningError> {
    match v {
        0 | 1 => Ok(27 + v as u8),
        27 | 28 => Ok(v as u8),
        v if v >= 35 => Ok(27 + ((v - 35) % 2) as u8),
        other => Err(SigningError::MalformedSignature(format!("recovery id {other}"))),
    }
}

/// One signing key handle from a key or account listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    /// Durable handle (private key id or wallet account id).
    pub id: String,
    /// Addresses attached to the handle, as listed.
    pub addresses: Vec<String>,
}

/// Entries of a `list_private_keys` / `list_wallet_accounts` answer.
pub fn parse_key_listing(value: &Value) -> Vec<KeyHandle> {
    let Some(entries) = find_field(value, &["privateKeys", "accounts", "walletAccounts"]).and_then(Value::as_array)
    else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let map = entry.as_object()?;
            let id = get_text(map, &["privateKeyId", "walletAccountId", "accountId", "id"])?;
            let mut addresses = Vec::new();
            collect_addresses(entry, &mut addresses, 0);
            Some(KeyHandle { id, addresses })
        })
        .collect()
}

fn collect_addresses(value: &Value, out: &mut Vec<String>, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }
    if let Some(addr) = value.get("address").and_then(as_text) {
        out.push(addr);
    }
    for child in children(value) {
        collect_addresses(child, out, depth + 1);
    }
}

// ────────────────────────────────────────────
// Exchange responses
// ────────────────────────────────────────────

/// Answer to an order submission.
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementResponse {
    /// Accepted with an order id.
    Accepted(OrderFields),
    /// Explicitly refused.
    Rejected(String),
    /// Looked successful but carried no order id.
    MissingOrderId,
}

/// Classify a `POST /order` answer.
pub fn classify_placement(value: &Value) -> PlacementResponse {
    let Some(map) = value.as_object() else {
        return PlacementResponse::MissingOrderId;
    };

    let success = get_flag(map, &["success"]);
    let error_msg = get_text(map, &["errorMsg", "error_msg", "error"]);
    let order_id = get_text(map, &["orderID", "orderId", "order_id", "id"]);

    if success == Some(false) || (order_id.is_none() && error_msg.is_some()) {
        return PlacementResponse::Rejected(error_msg.unwrap_or_else(|| "order not accepted".to_string()));
    }
    let Some(order_id) = order_id else {
        return PlacementResponse::MissingOrderId;
    };

    PlacementResponse::Accepted(OrderFields {
        order_id: Some(order_id),
        status: get_text(map, &["status"]),
        making_amount: get_decimal(map, &["makingAmount", "making_amount"]),
        taking_amount: get_decimal(map, &["takingAmount", "taking_amount"]),
        transaction_hashes: string_list(map, &["transactionsHashes", "transactionHashes", "transaction_hashes"]),
        ..OrderFields::default()
    })
}

fn string_list(map: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_array))
        .map(|items| items.iter().filter_map(as_text).collect())
        .unwrap_or_default()
}

/// Order details from `GET /data/order/{id}`, or `None` for an unknown shape.
pub fn parse_order_details(value: &Value) -> Option<OrderFields> {
    let map = value
        .get("order")
        .and_then(Value::as_object)
        .or_else(|| value.as_object())?;
    let order_id = get_text(map, &["id", "orderID", "order_id"])?;

    Some(OrderFields {
        order_id: Some(order_id),
        status: get_text(map, &["status"]),
        side: get_text(map, &["side"]),
        price: get_decimal(map, &["price"]),
        size: get_decimal(map, &["original_size", "originalSize", "size"]),
        size_matched: get_decimal(map, &["size_matched", "sizeMatched"]),
        order_type: get_text(map, &["order_type", "orderType", "type"]),
        outcome: get_text(map, &["outcome"]),
        created_at: ["created_at", "createdAt"]
            .iter()
            .find_map(|k| map.get(*k).and_then(as_timestamp)),
        transaction_hashes: string_list(map, &["transactionsHashes", "transaction_hashes", "associate_trades"]),
        making_amount: None,
        taking_amount: None,
    })
}

/// One outcome token of a market.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeToken {
    /// Instrument id.
    pub token_id: Option<String>,
    /// Outcome label ("Yes", "No", ...).
    pub outcome: Option<String>,
    /// Last price, if reported.
    pub price: Option<Decimal>,
    /// Explicit winner flag.
    pub winner: bool,
}

/// Fields of a market relevant to resolution. Absent means unreported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    /// Explicit resolved/settled/finalized flag.
    pub resolved_flag: Option<bool>,
    /// Status text.
    pub status: Option<String>,
    /// Market closed to trading.
    pub closed: Option<bool>,
    /// Order book still accepting orders.
    pub accepting_orders: Option<bool>,
    /// Outcome tokens.
    pub tokens: Vec<OutcomeToken>,
    /// Generic outcome/result field.
    pub outcome_field: Option<String>,
    /// Reported resolution time.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Known shapes of a market answer.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketResponse {
    /// An object with market fields.
    Market(MarketSnapshot),
    /// Anything else.
    Unrecognized,
}

/// Classify a `GET /markets/{conditionId}` answer. Accepts a bare market
/// object or one wrapped under `market` / `data`.
pub fn classify_market(value: &Value) -> MarketResponse {
    let Some(map) = ["market", "data"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_object))
        .or_else(|| value.as_object())
    else {
        return MarketResponse::Unrecognized;
    };

    let tokens = ["tokens", "outcomes"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|t| OutcomeToken {
                    token_id: get_text(t, &["token_id", "tokenId", "asset_id"]),
                    outcome: get_text(t, &["outcome", "name", "label"]),
                    price: get_decimal(t, &["price", "last_price"]),
                    winner: get_flag(t, &["winner", "is_winner", "isWinner"]).unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default();

    MarketResponse::Market(MarketSnapshot {
        resolved_flag: any_flag(map, &["resolved", "is_resolved", "isResolved", "settled", "finalized"]),
        status: get_text(map, &["status", "market_status", "resolution_status"]),
        closed: get_flag(map, &["closed", "is_closed"]),
        accepting_orders: get_flag(map, &["accepting_orders", "acceptingOrders"]),
        tokens,
        outcome_field: get_text(
            map,
            &["winning_outcome", "winningOutcome", "resolved_outcome", "outcome", "result"],
        ),
        resolved_at: ["resolved_at", "resolvedAt", "resolution_time", "closed_time"]
            .iter()
            .find_map(|k| map.get(*k).and_then(as_timestamp)),
    })
}
