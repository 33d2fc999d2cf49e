//! Exchange Port - Order Book Exchange Facade Interface
//!
//! Defines the trait the round state machine uses to place a member's
//! market order, read an order back, and learn whether a market has
//! resolved. Response shapes from the exchange are loosely typed; the
//! adapter normalises them into the domain types used here.

use async_trait::async_trait;

use crate::domain::round::{MarketResolution, MemberIdentity, OrderFields};

/// Trait for the exchange client facade.
///
/// Implementors authenticate with the member's stored API credentials
/// (or derive them through the remote signer) and sign orders through
/// the signing adapter.
#[async_trait]
pub trait Exchange: Send + Sync + 'static {
    /// Place a fill-or-kill market buy sized from a smallest-unit amount.
    ///
    /// The returned fields always carry `order_id`.
    ///
    /// # Errors
    /// `ExchangeError::InvalidAmount`, `ExchangeError::OrderRejected` or
    /// `ExchangeError::MalformedResponse` wrapped in `anyhow`, or a
    /// transport / signing failure.
    async fn place_market_order(
        &self,
        member: &MemberIdentity,
        token_id: &str,
        amount: u64,
    ) -> anyhow::Result<OrderFields>;

    /// Fetch live status and fill details for an order.
    async fn get_order(&self, member: &MemberIdentity, order_id: &str) -> anyhow::Result<OrderFields>;

    /// Current resolution state of a market. Fails closed.
    async fn get_market_resolution(&self, condition_id: &str) -> anyhow::Result<MarketResolution>;
}
