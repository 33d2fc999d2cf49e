//! Order Book Adapter - Market Buy Pricing
//!
//! Fetches order book snapshots from the Polymarket CLOB REST API and
//! derives the limit price a fill-or-kill market buy needs: walk the
//! asks from the best price upward until the notional is covered.

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::debug;

use super::client::ClobClient;
use super::types::{OrderBookLevel, OrderBookResponse};
use crate::error::ExchangeError;

/// Order book adapter that wraps the CLOB HTTP client.
pub struct OrderBookAdapter {
    client: Arc<ClobClient>,
}

impl OrderBookAdapter {
    /// Create a new order book adapter.
    pub fn new(client: Arc<ClobClient>) -> Self {
        Self { client }
    }

    /// Fetch the order book snapshot for a single token.
    ///
    /// Calls GET /book?token_id={token_id}; the book is public.
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBookResponse> {
        let path = format!("/book?token_id={token_id}");
        let response = self
            .client
            .get(&path, &Vec::new())
            .await
            .context("Failed to fetch order book")?;

        let book: OrderBookResponse =
            serde_json::from_value(response).context("Failed to parse order book response")?;

        debug!(token_id, bids = book.bids.len(), asks = book.asks.len(), "Order book fetched");
        Ok(book)
    }

    /// Limit price for a market buy of `notional` collateral.
    ///
    /// # Errors
    /// [`ExchangeError::NoLiquidity`] when the asks cannot absorb the notional.
    pub async fn market_buy_price(&self, token_id: &str, notional: Decimal) -> Result<Decimal> {
        let book = self.get_order_book(token_id).await?;
        market_buy_price(&book.asks, notional).ok_or_else(|| {
            ExchangeError::NoLiquidity {
                token_id: token_id.to_string(),
            }
            .into()
        })
    }
}

/// Price of the ask level at which cumulative notional reaches `notional`.
///
/// Asks are sorted ascending first; unparsable levels are ignored.
pub fn market_buy_price(asks: &[OrderBookLevel], notional: Decimal) -> Option<Decimal> {
    let mut levels: Vec<(Decimal, Decimal)> = asks.iter().filter_map(OrderBookLevel::parsed).collect();
    levels.sort_by(|a, b| a.0.cmp(&b.0));

    let mut covered = Decimal::ZERO;
    for (price, size) in levels {
        covered += price * size;
        if covered >= notional {
            return Some(price);
        }
    }
    None
}
