//! Binance USDⓈ-M futures public endpoints.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use spread_arb_core::{FeedError, InstrumentSpec, PriceFeed, Quote, VenueConfig};

use crate::client::HttpClient;
use crate::error::VenueError;
use crate::symbols::{ContractInfo, ContractSource};

const EXCHANGE_INFO: &str = "/fapi/v1/exchangeInfo";
const BOOK_TICKER: &str = "/fapi/v1/ticker/bookTicker";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: Option<Decimal>,
    ask_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    quantity_precision: Option<u32>,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    min_qty: Option<Decimal>,
}

impl SymbolInfo {
    fn is_tradable_perpetual(&self) -> bool {
        self.contract_type == "PERPETUAL" && self.status == "TRADING"
    }

    fn min_quantity(&self) -> Decimal {
        self.filters
            .iter()
            .find(|f| f.filter_type == "LOT_SIZE")
            .and_then(|f| f.min_qty)
            .unwrap_or(Decimal::ZERO)
    }

    fn into_contract(self) -> ContractInfo {
        let spec = InstrumentSpec::new(
            self.quantity_precision.unwrap_or(3),
            Decimal::ONE,
            self.min_quantity(),
        );
        ContractInfo::new(self.symbol, spec)
    }
}

/// Binance perpetual futures adapter (market data and contract listing).
#[derive(Clone)]
pub struct BinanceFutures {
    client: HttpClient,
}

impl BinanceFutures {
    pub const VENUE: &'static str = "binance";

    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: &VenueConfig) -> Result<Self, VenueError> {
        Ok(Self {
            client: HttpClient::new(Self::VENUE, config)?,
        })
    }

    /// Sets a custom base URL (for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(url);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

#[async_trait]
impl PriceFeed for BinanceFutures {
    fn venue(&self) -> &str {
        Self::VENUE
    }

    async fn top_of_book(&self, symbol: &str) -> Result<Quote, FeedError> {
        let ticker: BookTicker = self
            .client
            .get_json(BOOK_TICKER, &[("symbol", symbol)])
            .await?;

        let bid = ticker.bid_price.unwrap_or(Decimal::ZERO);
        let ask = ticker.ask_price.unwrap_or(Decimal::ZERO);
        let quote = Quote::new(bid, ask);
        if !quote.is_valid() {
            return Err(FeedError::InvalidQuote {
                venue: Self::VENUE.to_string(),
                symbol: symbol.to_string(),
                bid: bid.to_string(),
                ask: ask.to_string(),
            });
        }
        Ok(quote)
    }
}

#[async_trait]
impl ContractSource for BinanceFutures {
    fn venue(&self) -> &str {
        Self::VENUE
    }

    async fn contracts(&self) -> Result<Vec<ContractInfo>, FeedError> {
        let info: ExchangeInfo = self.client.get_json(EXCHANGE_INFO, &[]).await?;
        let total = info.symbols.len();
        let contracts: Vec<ContractInfo> = info
            .symbols
            .into_iter()
            .filter(SymbolInfo::is_tradable_perpetual)
            .map(SymbolInfo::into_contract)
            .collect();
        debug!(total, perpetuals = contracts.len(), "Binance contracts");
        Ok(contracts)
    }
}
