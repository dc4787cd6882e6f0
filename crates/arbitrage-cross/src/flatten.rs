//! Flatten-and-reconcile: drive a venue position to zero.
//!
//! Flattening is always driven by the venue-reported position, never by what
//! the engine believes it holds. For each leg the flattener
//!
//! 1. reads the signed position (retrying transient errors), and for a leg
//!    whose entry order never settled keeps polling a zero reading for the
//!    close timeout in case a late fill lands,
//! 2. sends a reduce-only market order for the opposite side,
//! 3. falls back to the venue's close-position order if that is refused,
//! 4. polls the position until it reads zero or the close timeout expires.
//!
//! A leg that cannot be confirmed flat is reported, logged at error level and
//! left for the operator; it is never silently dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use spread_arb_core::{
    ExecutionConfig, FillReport, GatewayError, Instrument, Leg, OrderGateway, OrderRequest,
    PerLeg, Side, TradingPair,
};

// =============================================================================
// Reports
// =============================================================================

/// Final status of one flattened leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlattenStatus {
    /// Position was already zero.
    AlreadyFlat,
    /// Closing order filled and the position now reads zero.
    Closed,
    /// Position still non-zero when the close timeout expired.
    TimedOut { remaining: Decimal },
    /// Neither the reduce-only order nor the fallback could be placed.
    Failed { error: String },
}

/// Outcome of flattening one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenLegReport {
    pub leg: Leg,
    pub venue: String,
    pub symbol: String,
    /// Quantity the venue reported before closing, signed.
    pub initial_qty: Decimal,
    pub closed_qty: Decimal,
    /// Average fill price of the closing order.
    pub exit_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub used_fallback: bool,
    pub status: FlattenStatus,
}

impl FlattenLegReport {
    pub fn is_flat(&self) -> bool {
        matches!(self.status, FlattenStatus::AlreadyFlat | FlattenStatus::Closed)
    }
}

/// Outcome of flattening both legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenReport {
    pub legs: PerLeg<FlattenLegReport>,
}

impl FlattenReport {
    pub fn is_flat(&self) -> bool {
        self.legs.a.is_flat() && self.legs.b.is_flat()
    }

    pub fn leg(&self, leg: Leg) -> &FlattenLegReport {
        self.legs.get(leg)
    }
}

// =============================================================================
// Flattener
// =============================================================================

/// Timing for flatten operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlattenConfig {
    pub order_timeout: Duration,
    pub close_timeout: Duration,
    pub poll_interval: Duration,
    pub read_retries: u32,
}

impl From<&ExecutionConfig> for FlattenConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            order_timeout: config.order_timeout(),
            close_timeout: config.close_timeout(),
            poll_interval: config.close_poll(),
            read_retries: config.position_read_retries,
        }
    }
}

/// Closes venue positions and waits for confirmation.
#[derive(Clone)]
pub struct Flattener {
    gateways: PerLeg<Arc<dyn OrderGateway>>,
    config: FlattenConfig,
}

impl Flattener {
    pub fn new(gateways: PerLeg<Arc<dyn OrderGateway>>, config: FlattenConfig) -> Self {
        Self { gateways, config }
    }

    /// Flattens both legs of `pair` concurrently.
    pub async fn flatten_pair(&self, pair: &TradingPair) -> FlattenReport {
        self.flatten_pair_settling(pair, PerLeg::default()).await
    }

    /// Flattens both legs of `pair`, treating every leg marked in `unsettled`
    /// as possibly carrying a late fill.
    ///
    /// An unsettled leg that reads zero is polled for the close timeout
    /// before it is reported flat. Anything that appears in that window is
    /// closed like any other position.
    pub async fn flatten_pair_settling(
        &self,
        pair: &TradingPair,
        unsettled: PerLeg<bool>,
    ) -> FlattenReport {
        let (a, b) = tokio::join!(
            self.flatten_leg_settling(Leg::A, pair.instrument(Leg::A), unsettled.a),
            self.flatten_leg_settling(Leg::B, pair.instrument(Leg::B), unsettled.b),
        );
        let report = FlattenReport {
            legs: PerLeg::new(a, b),
        };
        if report.is_flat() {
            info!(symbol = %pair.canonical, "Both legs flat");
        } else {
            error!(
                symbol = %pair.canonical,
                leg_a = ?report.legs.a.status,
                leg_b = ?report.legs.b.status,
                "Flatten incomplete, positions may still be open. Manual check required"
            );
        }
        report
    }

    /// Flattens a single leg.
    pub async fn flatten_leg(&self, leg: Leg, instrument: &Instrument) -> FlattenLegReport {
        self.flatten_leg_settling(leg, instrument, false).await
    }

    async fn flatten_leg_settling(
        &self,
        leg: Leg,
        instrument: &Instrument,
        unsettled: bool,
    ) -> FlattenLegReport {
        let gateway = self.gateways.get(leg);
        let venue = gateway.venue().to_string();
        let symbol = instrument.symbol.clone();

        let mut report = FlattenLegReport {
            leg,
            venue: venue.clone(),
            symbol: symbol.clone(),
            initial_qty: Decimal::ZERO,
            closed_qty: Decimal::ZERO,
            exit_price: None,
            closed_at: None,
            used_fallback: false,
            status: FlattenStatus::AlreadyFlat,
        };

        let mut position = match self.read_position(gateway.as_ref(), &symbol).await {
            Ok(qty) => Some(qty),
            Err(e) => {
                warn!(venue = %venue, symbol = %symbol, error = %e, "Position read failed, closing blind");
                None
            }
        };

        if let Some(qty) = position {
            report.initial_qty = qty;
            if qty.is_zero() {
                if !unsettled {
                    debug!(venue = %venue, symbol = %symbol, "Leg already flat");
                    return report;
                }
                match self.await_late_fill(gateway.as_ref(), &symbol).await {
                    Some(late) => {
                        warn!(venue = %venue, symbol = %symbol, qty = %late, "Late fill on unsettled leg, closing");
                        report.initial_qty = late;
                        position = Some(late);
                    }
                    None => {
                        debug!(venue = %venue, symbol = %symbol, "Leg stayed flat through settle window");
                        return report;
                    }
                }
            }
        }

        let fill = match position {
            Some(qty) => {
                let side = if qty > Decimal::ZERO { Side::Sell } else { Side::Buy };
                let order = OrderRequest::reduce_only(&symbol, side, qty.abs());
                match self.submit(gateway.as_ref(), &order).await {
                    Ok(fill) => Ok(fill),
                    Err(e) => {
                        warn!(venue = %venue, symbol = %symbol, error = %e, "Reduce-only close failed, using close-position fallback");
                        report.used_fallback = true;
                        self.submit_fallback(gateway.as_ref(), &symbol).await
                    }
                }
            }
            None => {
                report.used_fallback = true;
                self.submit_fallback(gateway.as_ref(), &symbol).await
            }
        };

        match fill {
            Ok(fill) => {
                report.closed_qty = fill.filled_qty;
                report.exit_price = fill.avg_price;
                report.closed_at = fill.filled_at;
            }
            Err(e) => {
                error!(venue = %venue, symbol = %symbol, error = %e, "Could not close leg. Manual intervention required");
                report.status = FlattenStatus::Failed {
                    error: e.to_string(),
                };
                return report;
            }
        }

        report.status = self.wait_flat(gateway.as_ref(), &symbol).await;
        match &report.status {
            FlattenStatus::TimedOut { remaining } => error!(
                venue = %venue,
                symbol = %symbol,
                remaining = %remaining,
                "Close timed out, position may still be open"
            ),
            _ => info!(
                venue = %venue,
                symbol = %symbol,
                qty = %report.closed_qty,
                price = ?report.exit_price,
                "Leg closed"
            ),
        }
        report
    }

    async fn submit(
        &self,
        gateway: &dyn OrderGateway,
        order: &OrderRequest,
    ) -> Result<FillReport, GatewayError> {
        let handle = gateway.place_market_order(order).await?;
        let fill = gateway.await_fill(&handle, self.config.order_timeout).await?;
        if fill.status.has_fills() {
            Ok(fill)
        } else {
            Err(GatewayError::rejected(
                gateway.venue(),
                format!("close order ended {:?}", fill.status),
            ))
        }
    }

    async fn submit_fallback(
        &self,
        gateway: &dyn OrderGateway,
        symbol: &str,
    ) -> Result<FillReport, GatewayError> {
        let handle = gateway.close_position(symbol).await?;
        gateway.await_fill(&handle, self.config.order_timeout).await
    }

    async fn read_position(
        &self,
        gateway: &dyn OrderGateway,
        symbol: &str,
    ) -> Result<Decimal, GatewayError> {
        let mut attempt = 0;
        loop {
            match gateway.position_qty(symbol).await {
                Ok(qty) => return Ok(qty),
                Err(e) if e.is_retryable() && attempt < self.config.read_retries => {
                    attempt += 1;
                    debug!(venue = gateway.venue(), attempt, error = %e, "Retrying position read");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Polls a zero position until it turns non-zero or the close timeout
    /// expires.
    async fn await_late_fill(&self, gateway: &dyn OrderGateway, symbol: &str) -> Option<Decimal> {
        let deadline = Instant::now() + self.config.close_timeout;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            match gateway.position_qty(symbol).await {
                Ok(qty) if !qty.is_zero() => return Some(qty),
                Ok(_) => {}
                Err(e) => debug!(venue = gateway.venue(), error = %e, "Settle poll failed"),
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }

    async fn wait_flat(&self, gateway: &dyn OrderGateway, symbol: &str) -> FlattenStatus {
        let deadline = Instant::now() + self.config.close_timeout;
        let mut remaining = Decimal::ZERO;
        loop {
            match gateway.position_qty(symbol).await {
                Ok(qty) if qty.is_zero() => return FlattenStatus::Closed,
                Ok(qty) => remaining = qty,
                Err(e) => debug!(venue = gateway.venue(), error = %e, "Position poll failed"),
            }
            if Instant::now() >= deadline {
                return FlattenStatus::TimedOut { remaining };
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
