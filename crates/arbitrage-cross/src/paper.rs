//! Simulated order gateway priced from a live (or scripted) feed.
//!
//! `PaperGateway` implements [`OrderGateway`] without touching a venue. Market
//! orders fill immediately at the current top of book plus configurable
//! slippage, positions are tracked per symbol, and reduce-only orders are
//! clamped so they can only shrink a position.
//!
//! Failure injection hooks (`reject_next`, `stall_next`, `fill_late_next`,
//! scripted position readings, queued fill prices) let simulations exercise rejected legs,
//! fill timeouts and liquidations deterministically.
//!
//! # Example
//!
//! ```ignore
//! use spread_arb_cross::paper::{PaperGateway, PaperGatewayConfig};
//!
//! let gateway = PaperGateway::new("binance-paper", feed, PaperGatewayConfig::always_fill());
//! let handle = gateway.place_market_order(&OrderRequest::market("BTCUSDT", Side::Buy, dec!(0.01))).await?;
//! ```

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use spread_arb_core::{
    FillReport, GatewayError, OrderGateway, OrderHandle, OrderRequest, OrderStatus, PriceFeed,
    Side,
};

// =============================================================================
// Configuration
// =============================================================================

/// Simulation parameters for [`PaperGateway`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperGatewayConfig {
    /// Adverse price adjustment applied to every fill, in basis points.
    pub slippage_bps: Decimal,

    /// Delay before an order is acknowledged.
    pub latency_ms: u64,

    /// Probability that a market order fills (0.0 to 1.0). Orders that do not
    /// fill end `Cancelled` without changing the position.
    pub fill_rate: f64,

    /// Optional random seed for reproducible runs.
    pub random_seed: Option<u64>,
}

impl Default for PaperGatewayConfig {
    fn default() -> Self {
        Self {
            slippage_bps: Decimal::ZERO,
            latency_ms: 0,
            fill_rate: 1.0,
            random_seed: None,
        }
    }
}

impl PaperGatewayConfig {
    /// Every order fills at the quoted price.
    #[must_use]
    pub fn always_fill() -> Self {
        Self::default()
    }

    /// No order ever fills.
    #[must_use]
    pub fn never_fill() -> Self {
        Self {
            fill_rate: 0.0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_slippage_bps(mut self, bps: Decimal) -> Self {
        self.slippage_bps = bps;
        self
    }

    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// An order recorded by the paper gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperOrder {
    pub order_id: String,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub fill_price: Option<Decimal>,
    /// True when placed through `close_position`.
    pub close_position: bool,
}

/// A stalled order whose fill lands on a later position read.
struct LateFill {
    order_id: String,
    symbol: String,
    signed_qty: Decimal,
    price: Decimal,
}

#[derive(Default)]
struct PaperState {
    positions: HashMap<String, Decimal>,
    fills: HashMap<String, FillReport>,
    history: Vec<PaperOrder>,
    rejects_remaining: u32,
    reduce_only_rejects_remaining: u32,
    stalls_remaining: u32,
    late_fills_remaining: u32,
    late_fills: Vec<LateFill>,
    fill_prices: VecDeque<Decimal>,
    position_script: HashMap<String, VecDeque<Result<Decimal, GatewayError>>>,
}

// =============================================================================
// Paper Gateway
// =============================================================================

/// Simulated venue.
pub struct PaperGateway {
    venue: String,
    feed: Arc<dyn PriceFeed>,
    config: PaperGatewayConfig,
    state: Mutex<PaperState>,
    rng: Mutex<StdRng>,
    next_id: AtomicU64,
}

impl PaperGateway {
    pub fn new(venue: impl Into<String>, feed: Arc<dyn PriceFeed>, config: PaperGatewayConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            venue: venue.into(),
            feed,
            config,
            state: Mutex::new(PaperState::default()),
            rng: Mutex::new(rng),
            next_id: AtomicU64::new(1),
        }
    }

    // ==================== Failure Injection ====================

    /// The next `n` orders of any kind are rejected.
    pub fn reject_next(&self, n: u32) {
        self.state.lock().rejects_remaining = n;
    }

    /// The next `n` reduce-only orders are rejected. `close_position` is
    /// unaffected.
    pub fn reject_next_reduce_only(&self, n: u32) {
        self.state.lock().reduce_only_rejects_remaining = n;
    }

    /// The next `n` orders are acknowledged but never fill.
    pub fn stall_next(&self, n: u32) {
        self.state.lock().stalls_remaining = n;
    }

    /// The next `n` orders time out like a stall, then fill in full right
    /// after the next position read for their symbol.
    pub fn fill_late_next(&self, n: u32) {
        self.state.lock().late_fills_remaining = n;
    }

    /// Fill the next order at `price` instead of the quoted price.
    pub fn queue_fill_price(&self, price: Decimal) {
        self.state.lock().fill_prices.push_back(price);
    }

    /// Readings returned by `position_qty` for `symbol` before falling back
    /// to the tracked position.
    pub fn script_positions(
        &self,
        symbol: &str,
        readings: impl IntoIterator<Item = Result<Decimal, GatewayError>>,
    ) {
        self.state
            .lock()
            .position_script
            .entry(symbol.to_string())
            .or_default()
            .extend(readings);
    }

    /// Overwrites the tracked position, e.g. to simulate a liquidation.
    pub fn set_position(&self, symbol: &str, qty: Decimal) {
        self.state.lock().positions.insert(symbol.to_string(), qty);
    }

    /// Tracked position, ignoring any scripted readings.
    pub fn position(&self, symbol: &str) -> Decimal {
        self.state
            .lock()
            .positions
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// All orders seen so far, including rejected ones.
    pub fn orders(&self) -> Vec<PaperOrder> {
        self.state.lock().history.clone()
    }

    // ==================== Simulation ====================

    fn next_order_id(&self) -> String {
        format!("{}-{}", self.venue, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn slipped(&self, price: Decimal, side: Side) -> Decimal {
        let slip = self.config.slippage_bps / Decimal::from(10_000);
        match side {
            Side::Buy => price * (Decimal::ONE + slip),
            Side::Sell => price * (Decimal::ONE - slip),
        }
    }

    async fn market_price(&self, symbol: &str, side: Side) -> Result<Decimal, GatewayError> {
        let quote = self
            .feed
            .top_of_book(symbol)
            .await
            .map_err(|e| GatewayError::network(&self.venue, e.to_string()))?;
        Ok(self.slipped(quote.taker_price(side), side))
    }

    fn record_rejection(&self, state: &mut PaperState, order_id: &str, order: &OrderRequest, close_position: bool) {
        state.history.push(PaperOrder {
            order_id: order_id.to_string(),
            request: order.clone(),
            status: OrderStatus::Rejected,
            filled_qty: Decimal::ZERO,
            fill_price: None,
            close_position,
        });
    }

    async fn execute(&self, order: &OrderRequest, close_position: bool) -> Result<OrderHandle, GatewayError> {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
        let order_id = self.next_order_id();

        {
            let mut state = self.state.lock();
            if state.rejects_remaining > 0 {
                state.rejects_remaining -= 1;
                self.record_rejection(&mut state, &order_id, order, close_position);
                return Err(GatewayError::rejected(&self.venue, "simulated rejection"));
            }
            if order.reduce_only && !close_position && state.reduce_only_rejects_remaining > 0 {
                state.reduce_only_rejects_remaining -= 1;
                self.record_rejection(&mut state, &order_id, order, close_position);
                return Err(GatewayError::rejected(&self.venue, "simulated reduce-only rejection"));
            }
        }

        if order.quantity <= Decimal::ZERO {
            return Err(GatewayError::invalid_order(&self.venue, "quantity must be positive"));
        }

        let queued_price = self.state.lock().fill_prices.pop_front();
        let price = match queued_price {
            Some(price) => price,
            None => self.market_price(&order.symbol, order.side).await?,
        };

        let fills = self.rng.lock().gen_bool(self.config.fill_rate.clamp(0.0, 1.0));

        let mut state = self.state.lock();
        let position = state.positions.get(&order.symbol).copied().unwrap_or(Decimal::ZERO);

        let mut quantity = order.quantity;
        if order.reduce_only {
            let reduces = (position > Decimal::ZERO && order.side == Side::Sell)
                || (position < Decimal::ZERO && order.side == Side::Buy);
            if !reduces {
                self.record_rejection(&mut state, &order_id, order, close_position);
                return Err(GatewayError::rejected(
                    &self.venue,
                    "reduce-only order would increase position",
                ));
            }
            quantity = quantity.min(position.abs());
        }

        let stalled = state.stalls_remaining > 0;
        if stalled {
            state.stalls_remaining -= 1;
        }
        let late = !stalled && state.late_fills_remaining > 0;
        if late {
            state.late_fills_remaining -= 1;
            state.late_fills.push(LateFill {
                order_id: order_id.clone(),
                symbol: order.symbol.clone(),
                signed_qty: quantity * order.side.sign(),
                price,
            });
        }

        let (status, filled_qty, fill_price) = if stalled || late {
            (OrderStatus::Pending, Decimal::ZERO, None)
        } else if !fills {
            (OrderStatus::Cancelled, Decimal::ZERO, None)
        } else {
            *state.positions.entry(order.symbol.clone()).or_default() += quantity * order.side.sign();
            (OrderStatus::Filled, quantity, Some(price))
        };

        debug!(
            venue = %self.venue,
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %quantity,
            status = ?status,
            "Paper order"
        );

        let now = Utc::now();
        state.fills.insert(
            order_id.clone(),
            FillReport {
                order_id: order_id.clone(),
                status,
                filled_qty,
                avg_price: fill_price,
                filled_at: fill_price.map(|_| now),
            },
        );
        state.history.push(PaperOrder {
            order_id: order_id.clone(),
            request: order.clone(),
            status,
            filled_qty,
            fill_price,
            close_position,
        });

        Ok(OrderHandle {
            order_id,
            venue: self.venue.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            submitted_at: now,
        })
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayError> {
        self.execute(order, false).await
    }

    async fn await_fill(
        &self,
        handle: &OrderHandle,
        timeout: Duration,
    ) -> Result<FillReport, GatewayError> {
        let report = self.state.lock().fills.get(&handle.order_id).cloned();
        match report {
            Some(report) if report.status.is_terminal() => Ok(report),
            Some(_) => {
                // Stalled orders never progress; late fills only land on a
                // position read.
                tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
                Err(GatewayError::timeout(&self.venue))
            }
            None => Err(GatewayError::OrderNotFound {
                venue: self.venue.clone(),
                order_id: handle.order_id.clone(),
            }),
        }
    }

    async fn position_qty(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let mut state = self.state.lock();
        if let Some(reading) = state
            .position_script
            .get_mut(symbol)
            .and_then(VecDeque::pop_front)
        {
            return reading;
        }
        let reading = state.positions.get(symbol).copied().unwrap_or(Decimal::ZERO);

        let (landing, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.late_fills)
            .into_iter()
            .partition(|late| late.symbol == symbol);
        state.late_fills = waiting;
        for late in landing {
            debug!(venue = %self.venue, order_id = %late.order_id, qty = %late.signed_qty, "Late paper fill");
            *state.positions.entry(late.symbol).or_default() += late.signed_qty;
            if let Some(report) = state.fills.get_mut(&late.order_id) {
                report.status = OrderStatus::Filled;
                report.filled_qty = late.signed_qty.abs();
                report.avg_price = Some(late.price);
                report.filled_at = Some(Utc::now());
            }
        }
        Ok(reading)
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderHandle, GatewayError> {
        let position = self.position(symbol);
        if position.is_zero() {
            return Err(GatewayError::rejected(&self.venue, "no position to close"));
        }
        let side = if position > Decimal::ZERO { Side::Sell } else { Side::Buy };
        let order = OrderRequest::reduce_only(symbol, side, position.abs());
        self.execute(&order, true).await
    }
}
