//! CLOB Exchange Facade — Member Order Placement and Market State
//!
//! Implements the `Exchange` port using the shared `ClobClient`. Each
//! member trades with their own API credentials; orders are EIP-712
//! structs signed remotely for the member's custodial EOA and submitted
//! as fill-or-kill market buys.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::auth::{self, AuthHeaders, BuilderAuth};
use super::client::{ClobClient, HttpStatusError};
use super::eip712::{ExchangeOrder, Side, clob_auth_domain, clob_auth_struct_hash, exchange_domain, signing_digest};
use super::markets::{derive_resolution, is_valid_condition_id};
use super::orderbook::OrderBookAdapter;
use super::types::{DeriveApiKeyResponse, PostOrderRequest, SignedOrderPayload};
use crate::adapters::normalize::{
    MarketResponse, PlacementResponse, classify_market, classify_placement, parse_order_details,
};
use crate::domain::round::{ApiCredentials, MarketResolution, MemberIdentity, OrderFields};
use crate::domain::units::{to_notional, to_units};
use crate::error::ExchangeError;
use crate::ports::exchange::Exchange;
use crate::ports::signer::{DigestSigner, SignerIdentity};

/// Salt values stay within a JSON-safe integer range.
const SALT_MASK: u64 = (1 << 53) - 1;

/// Order type used for every market order.
const FILL_OR_KILL: &str = "FOK";

/// Protocol parameters for order construction.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    /// Chain the exchange contract lives on.
    pub chain_id: u64,
    /// Exchange contract (EIP-712 verifying contract).
    pub exchange_address: Address,
    /// Fee rate in basis points written into each order.
    pub fee_rate_bps: u64,
    /// Derive API credentials through the signer when none are stored.
    pub derive_missing_credentials: bool,
}

/// Collateral and share amounts, 6-decimal units, for a market buy.
///
/// Collateral is truncated to 2 dp and shares to 4 dp.
///
/// # Errors
/// [`ExchangeError::InvalidAmount`] if either side truncates to zero, or
/// the price lies outside (0, 1).
pub fn market_buy_amounts(notional: Decimal, price: Decimal) -> Result<(u64, u64), ExchangeError> {
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(ExchangeError::InvalidAmount(format!("price {price} outside (0, 1)")));
    }
    let collateral = notional.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    let shares = (collateral / price).round_dp_with_strategy(4, RoundingStrategy::ToZero);

    match (to_units(collateral), to_units(shares)) {
        (Some(maker), Some(taker)) if maker > 0 && taker > 0 => Ok((maker, taker)),
        _ => Err(ExchangeError::InvalidAmount(format!(
            "notional {notional} at price {price} is below the minimum order size"
        ))),
    }
}

/// Interpret the answer to `POST /order`.
///
/// A 4xx answer is a rejection carrying the exchange's error text; an
/// accepted answer without an order id is malformed.
///
/// # Errors
/// [`ExchangeError::OrderRejected`] or [`ExchangeError::MalformedResponse`]
/// wrapped in `anyhow`, or the transport error with context.
pub fn interpret_submission(response: Result<Value>) -> Result<OrderFields> {
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            if let Some(status) = e.downcast_ref::<HttpStatusError>() {
                if status.status < 500 {
                    let text = match status.json().map(|v| classify_placement(&v)) {
                        Some(PlacementResponse::Rejected(msg)) => msg,
                        _ => status.body.clone(),
                    };
                    warn!(status = status.status, reason = %text, "Order rejected by CLOB");
                    return Err(ExchangeError::OrderRejected(text).into());
                }
            }
            return Err(e.context("Failed to submit order"));
        }
    };

    match classify_placement(&response) {
        PlacementResponse::Accepted(fields) => Ok(fields),
        PlacementResponse::Rejected(msg) => {
            warn!(reason = %msg, "Order rejected by CLOB");
            Err(ExchangeError::OrderRejected(msg).into())
        }
        PlacementResponse::MissingOrderId => {
            Err(ExchangeError::MalformedResponse("order accepted without an order id".into()).into())
        }
    }
}

/// Placement fields merged with a best-effort live lookup. A failed lookup
/// is logged and the placement data kept.
pub fn with_enrichment(placed: OrderFields, live: Result<OrderFields>) -> OrderFields {
    match live {
        Ok(live) => placed.merge_live(live),
        Err(e) => {
            warn!(
                order_id = placed.order_id.as_deref().unwrap_or_default(),
                error = %format!("{e:#}"),
                "Order enrichment failed, keeping placement data"
            );
            placed
        }
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, ExchangeError> {
    Address::from_str(value.trim()).map_err(|e| ExchangeError::MissingIdentity(format!("invalid {field} {value}: {e}")))
}

fn new_salt() -> u64 {
    (Uuid::new_v4().as_u128() as u64) & SALT_MASK
}

/// CLOB facade backed by the shared client and the remote signer.
pub struct ClobExchange {
    /// Shared CLOB client with retry.
    client: Arc<ClobClient>,
    /// Order book adapter for market pricing.
    orderbook: OrderBookAdapter,
    /// Remote signer for order and L1 auth digests.
    signer: Arc<dyn DigestSigner>,
    /// Operator builder attribution, if configured.
    builder: Option<BuilderAuth>,
    /// Protocol parameters.
    settings: ExchangeSettings,
    /// Credentials derived this process, keyed by lowercase signer address.
    derived: Mutex<HashMap<String, ApiCredentials>>,
}

impl ClobExchange {
    /// Create a new exchange facade.
    pub fn new(
        client: Arc<ClobClient>,
        signer: Arc<dyn DigestSigner>,
        builder: Option<BuilderAuth>,
        settings: ExchangeSettings,
    ) -> Self {
        Self {
            orderbook: OrderBookAdapter::new(Arc::clone(&client)),
            client,
            signer,
            builder,
            settings,
            derived: Mutex::new(HashMap::new()),
        }
    }

    fn signer_identity(member: &MemberIdentity) -> SignerIdentity {
        SignerIdentity {
            organization_id: member.organization_id.clone(),
            wallet_address: member.signer_address.clone(),
        }
    }

    /// Stored credentials, or derived ones when enabled.
    async fn credentials_for(&self, member: &MemberIdentity) -> Result<ApiCredentials> {
        if let Some(creds) = &member.credentials {
            return Ok(creds.clone());
        }
        if !self.settings.derive_missing_credentials {
            return Err(ExchangeError::MissingIdentity(format!("user {} has no API credentials", member.user_id)).into());
        }

        let key = member.signer_address.trim().to_ascii_lowercase();
        if let Some(creds) = self.derived.lock().await.get(&key) {
            return Ok(creds.clone());
        }
        let creds = self.derive_api_key(member).await?;
        self.derived.lock().await.insert(key, creds.clone());
        Ok(creds)
    }

    /// L1 flow: sign a `ClobAuth` message and call `/auth/derive-api-key`.
    #[instrument(skip(self, member), fields(user_id = %member.user_id))]
    async fn derive_api_key(&self, member: &MemberIdentity) -> Result<ApiCredentials> {
        let signer = parse_address("signer address", &member.signer_address)?;
        let ts = auth::timestamp();
        let nonce = 0;
        let digest = signing_digest(
            &clob_auth_domain(self.settings.chain_id),
            clob_auth_struct_hash(signer, &ts, nonce),
        );
        let signature = self
            .signer
            .sign_digest(&Self::signer_identity(member), digest)
            .await
            .context("Failed to sign L1 auth message")?;

        let headers = auth::l1_headers(&signer.to_checksum(None), &signature.to_hex(), &ts, nonce);
        let response = self
            .client
            .get("/auth/derive-api-key", &headers)
            .await
            .context("Failed to derive API key")?;
        let derived: DeriveApiKeyResponse = serde_json::from_value(response)
            .map_err(|e| ExchangeError::MalformedResponse(format!("derive-api-key: {e}")))?;

        info!(api_key = %derived.api_key, "Derived API credentials");
        Ok(ApiCredentials {
            api_key: derived.api_key,
            secret: derived.secret,
            passphrase: derived.passphrase,
        })
    }

    fn submission_headers(
        &self,
        member: &MemberIdentity,
        creds: &ApiCredentials,
        path: &str,
        body: &str,
    ) -> Result<AuthHeaders> {
        let mut headers = auth::l2_headers(&member.signer_address, creds, "POST", path, body)?;
        if let Some(builder) = &self.builder {
            headers.extend(builder.headers("POST", path, body)?);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Exchange for ClobExchange {
    #[instrument(skip(self, member), fields(user_id = %member.user_id, token = %token_id))]
    async fn place_market_order(&self, member: &MemberIdentity, token_id: &str, amount: u64) -> Result<OrderFields> {
        let notional = to_notional(amount);
        if notional <= Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(format!("amount {amount} is not positive")).into());
        }

        let creds = self.credentials_for(member).await?;
        let maker = parse_address("maker address", &member.maker_address)?;
        let signer = parse_address("signer address", &member.signer_address)?;
        let token = U256::from_str(token_id).with_context(|| format!("Invalid token id {token_id}"))?;

        let price = self.orderbook.market_buy_price(token_id, notional).await?;
        let (maker_amount, taker_amount) = market_buy_amounts(notional, price)?;

        let salt = new_salt();
        let order = ExchangeOrder {
            salt: U256::from(salt),
            maker,
            signer,
            taker: Address::ZERO,
            token_id: token,
            maker_amount: U256::from(maker_amount),
            taker_amount: U256::from(taker_amount),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            fee_rate_bps: U256::from(self.settings.fee_rate_bps),
            side: Side::Buy,
            signature_type: member.signature_type,
        };
        let digest = signing_digest(
            &exchange_domain(self.settings.chain_id, self.settings.exchange_address),
            order.struct_hash(),
        );
        let signature = self
            .signer
            .sign_digest(&Self::signer_identity(member), digest)
            .await
            .context("Failed to sign order")?;

        let request = PostOrderRequest {
            order: SignedOrderPayload {
                salt,
                maker: maker.to_checksum(None),
                signer: signer.to_checksum(None),
                taker: Address::ZERO.to_checksum(None),
                token_id: token_id.to_string(),
                maker_amount: maker_amount.to_string(),
                taker_amount: taker_amount.to_string(),
                expiration: "0".to_string(),
                nonce: "0".to_string(),
                fee_rate_bps: self.settings.fee_rate_bps.to_string(),
                side: Side::Buy.as_str().to_string(),
                signature_type: member.signature_type,
                signature: signature.to_hex(),
            },
            owner: creds.api_key.clone(),
            order_type: FILL_OR_KILL.to_string(),
        };
        let body = serde_json::to_string(&request)?;
        let headers = self.submission_headers(member, &creds, "/order", &body)?;

        let submitted = interpret_submission(self.client.post("/order", &body, &headers).await)?;
        let placed = OrderFields {
            side: Some(Side::Buy.as_str().to_string()),
            price: Some(price),
            size: Some(to_notional(taker_amount)),
            order_type: Some(FILL_OR_KILL.to_string()),
            ..submitted
        };

        let order_id = placed.order_id.clone().unwrap_or_default();
        info!(order_id = %order_id, price = %price, maker_amount, taker_amount, "Order placed successfully");

        let live = self.get_order(member, &order_id).await;
        Ok(with_enrichment(placed, live))
    }

    #[instrument(skip(self, member), fields(user_id = %member.user_id))]
    async fn get_order(&self, member: &MemberIdentity, order_id: &str) -> Result<OrderFields> {
        let creds = self.credentials_for(member).await?;
        let path = format!("/data/order/{order_id}");
        let headers = auth::l2_headers(&member.signer_address, &creds, "GET", &path, "")?;

        let response = self
            .client
            .get(&path, &headers)
            .await
            .context("Failed to get order")?;

        parse_order_details(&response)
            .ok_or_else(|| ExchangeError::MalformedResponse(format!("order {order_id} has no id")).into())
    }

    #[instrument(skip(self))]
    async fn get_market_resolution(&self, condition_id: &str) -> Result<MarketResolution> {
        if !is_valid_condition_id(condition_id) {
            warn!(condition_id, "Malformed condition id, treating market as unresolved");
            return Ok(MarketResolution::unresolved());
        }

        let response = self
            .client
            .get(&format!("/markets/{condition_id}"), &Vec::new())
            .await
            .context("Failed to fetch market")?;

        let market = match classify_market(&response) {
            MarketResponse::Market(market) => market,
            MarketResponse::Unrecognized => {
                warn!(condition_id, "Unrecognized market response, treating as unresolved");
                return Ok(MarketResolution::unresolved());
            }
        };

        let resolution = derive_resolution(&market);
        if !resolution.is_resolved {
            info!(
                condition_id,
                status = ?market.status,
                closed = ?market.closed,
                accepting_orders = ?market.accepting_orders,
                winner_tokens = market.tokens.iter().filter(|t| t.winner).count(),
                "Market not resolved"
            );
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::api::client::ClobClientConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_buy_amounts_truncate() {
        // 10.129 USDC at 0.53 → 10.12 collateral, 19.0943 shares
        let (maker, taker) = market_buy_amounts(dec!(10.129), dec!(0.53)).unwrap();
        assert_eq!(maker, 10_120_000);
        assert_eq!(taker, 19_094_300);
    }

    #[test]
    fn test_market_buy_amounts_reject_dust_and_bad_price() {
        assert!(matches!(
            market_buy_amounts(dec!(0.0001), dec!(0.5)),
            Err(ExchangeError::InvalidAmount(_))
        ));
        assert!(market_buy_amounts(dec!(10), dec!(1)).is_err());
        assert!(market_buy_amounts(dec!(10), dec!(0)).is_err());
    }

    #[test]
    fn test_salt_fits_53_bits() {
        for _ in 0..32 {
            assert!(new_salt() <= SALT_MASK);
        }
    }

    // ---- Submission answers ----

    fn http_error(status: u16, body: &str) -> anyhow::Error {
        HttpStatusError {
            status,
            body: body.to_string(),
        }
        .into()
    }

    #[test]
    fn test_client_error_body_becomes_rejection_text() {
        let err = interpret_submission(Err(http_error(400, r#"{"error":"not enough balance / allowance"}"#)))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExchangeError>(),
            Some(ExchangeError::OrderRejected(msg)) if msg == "not enough balance / allowance"
        ));

        let err = interpret_submission(Err(http_error(422, "order crosses book"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExchangeError>(),
            Some(ExchangeError::OrderRejected(msg)) if msg == "order crosses book"
        ));
    }

    #[test]
    fn test_server_error_stays_a_transport_failure() {
        let err = interpret_submission(Err(http_error(503, "unavailable"))).unwrap_err();
        assert!(err.downcast_ref::<ExchangeError>().is_none());
        assert_eq!(err.downcast_ref::<HttpStatusError>().map(|e| e.status), Some(503));
    }

    #[test]
    fn test_accepted_without_order_id_is_malformed() {
        let err = interpret_submission(Ok(serde_json::json!({"success": true}))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExchangeError>(),
            Some(ExchangeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_accepted_answer_carries_order_id() {
        let placed = interpret_submission(Ok(serde_json::json!({
            "success": true, "orderID": "0xo1", "status": "matched", "takingAmount": "1.5"
        })))
        .unwrap();
        assert_eq!(placed.order_id.as_deref(), Some("0xo1"));
    }

    #[test]
    fn test_failed_enrichment_keeps_placement() {
        let placed = OrderFields {
            order_id: Some("0xo1".into()),
            taking_amount: Some(dec!(1.5)),
            ..OrderFields::default()
        };
        let kept = with_enrichment(placed.clone(), Err(anyhow::anyhow!("order lookup timed out")));
        assert_eq!(kept, placed);

        let live = OrderFields {
            order_id: Some("0xo1".into()),
            status: Some("MATCHED".into()),
            size_matched: Some(dec!(1.5)),
            ..OrderFields::default()
        };
        let merged = with_enrichment(placed, Ok(live));
        assert_eq!(merged.status.as_deref(), Some("MATCHED"));
        assert_eq!(merged.taking_amount, Some(dec!(1.5)));
    }

    // ---- Checks made before any request ----

    struct RefusingSigner;

    #[async_trait]
    impl DigestSigner for RefusingSigner {
        async fn sign_digest(
            &self,
            _identity: &SignerIdentity,
            _digest: alloy::primitives::B256,
        ) -> Result<crate::ports::signer::RecoverableSignature> {
            anyhow::bail!("signer not reachable")
        }
    }

    /// Facade whose client points at a closed local port: any request fails.
    fn offline_exchange() -> ClobExchange {
        let client = ClobClient::new(ClobClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: std::time::Duration::from_millis(200),
            max_retries: 0,
            ..ClobClientConfig::default()
        })
        .unwrap();
        ClobExchange::new(
            Arc::new(client),
            Arc::new(RefusingSigner),
            None,
            ExchangeSettings {
                chain_id: 137,
                exchange_address: Address::ZERO,
                fee_rate_bps: 0,
                derive_missing_credentials: false,
            },
        )
    }

    #[tokio::test]
    async fn test_malformed_condition_id_fails_closed_offline() {
        let exchange = offline_exchange();
        let non_hex = format!("0x{}", "zz".repeat(32));
        for bad in ["", "0x1234", "abcd", non_hex.as_str()] {
            assert_eq!(
                exchange.get_market_resolution(bad).await.unwrap(),
                MarketResolution::unresolved()
            );
        }
        // A well-formed id does reach the (closed) endpoint.
        assert!(exchange.get_market_resolution(&format!("0x{}", "ab".repeat(32))).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_amount_rejected_before_any_request() {
        let exchange = offline_exchange();
        let member = MemberIdentity {
            user_id: "u1".into(),
            maker_address: "0x0000000000000000000000000000000000000001".into(),
            signer_address: "0x0000000000000000000000000000000000000002".into(),
            organization_id: "org_1".into(),
            credentials: None,
            signature_type: 2,
        };
        let err = exchange.place_market_order(&member, "1", 0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExchangeError>(),
            Some(ExchangeError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_bad_address_is_identity_error() {
        assert!(matches!(
            parse_address("maker address", "0xsafe_u1"),
            Err(ExchangeError::MissingIdentity(_))
        ));
    }
}
