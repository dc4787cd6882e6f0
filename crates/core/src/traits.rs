use crate::error::{FeedError, GatewayError};
use crate::types::{Quote, Side, TradingPair};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-of-book source for one venue.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    fn venue(&self) -> &str;

    /// Current best bid and ask. Implementations must reject non-positive
    /// prices with [`FeedError::InvalidQuote`].
    async fn top_of_book(&self, symbol: &str) -> Result<Quote, FeedError>;
}

/// Order entry and position reads for one venue.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn venue(&self) -> &str;

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayError>;

    /// Waits until the order reaches a terminal status, or fails with
    /// [`GatewayError::Timeout`] once `timeout` elapses.
    async fn await_fill(
        &self,
        handle: &OrderHandle,
        timeout: Duration,
    ) -> Result<FillReport, GatewayError>;

    /// Signed position in venue quantity units: positive long, negative short.
    async fn position_qty(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    /// Venue-side "close entire position" order, used when a reduce-only
    /// market order is refused.
    async fn close_position(&self, symbol: &str) -> Result<OrderHandle, GatewayError>;

    /// Funding paid (negative) or received (positive) since `since`.
    async fn funding_since(
        &self,
        _symbol: &str,
        _since: DateTime<Utc>,
    ) -> Result<Decimal, GatewayError> {
        Ok(Decimal::ZERO)
    }
}

/// Source of symbols tradable on both venues.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    async fn trading_pairs(&self) -> Result<Vec<TradingPair>, FeedError>;
}

// =============================================================================
// Orders
// =============================================================================

/// A market order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            reduce_only: false,
        }
    }

    /// Order that may only shrink an existing position.
    pub fn reduce_only(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            reduce_only: true,
            ..Self::market(symbol, side, quantity)
        }
    }
}

/// Acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: String,
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub submitted_at: DateTime<Utc>,
}

/// Order status as reported by a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    pub fn has_fills(&self) -> bool {
        matches!(self, Self::PartiallyFilled | Self::Filled)
    }
}

/// Execution outcome of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    /// Volume-weighted fill price, when anything filled.
    pub avg_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl FillReport {
    /// Fully filled with a known price.
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
            && self.filled_qty > Decimal::ZERO
            && self.avg_price.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reduce_only_constructor() {
        let order = OrderRequest::reduce_only("BTCUSDT", Side::Sell, dec!(0.01));
        assert!(order.reduce_only);
        assert_eq!(order.side, Side::Sell);
        assert!(!OrderRequest::market("BTCUSDT", Side::Buy, dec!(1)).reduce_only);
    }

    #[test]
    fn test_order_status() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::PartiallyFilled.has_fills());
        assert!(!OrderStatus::Cancelled.has_fills());
    }

    #[test]
    fn test_fill_report_requires_price() {
        let report = FillReport {
            order_id: "1".to_string(),
            status: OrderStatus::Filled,
            filled_qty: dec!(1),
            avg_price: None,
            filled_at: None,
        };
        assert!(!report.is_filled());
    }
}
