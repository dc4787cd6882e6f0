//! KuCoin futures public endpoints.
//!
//! Responses are wrapped in `{"code": "200000", "data": ...}`; any other code
//! is a venue-side failure even when HTTP returns 200.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use spread_arb_core::{FeedError, InstrumentSpec, PriceFeed, Quote, VenueConfig};

use crate::client::HttpClient;
use crate::error::VenueError;
use crate::symbols::{ContractInfo, ContractSource};

const ACTIVE_CONTRACTS: &str = "/api/v1/contracts/active";
const TICKER: &str = "/api/v1/ticker";
const SUCCESS_CODE: &str = "200000";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    data: Option<T>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    best_bid_price: Option<Decimal>,
    best_ask_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Contract {
    symbol: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    multiplier: Option<Decimal>,
    #[serde(default)]
    lot_size: Option<Decimal>,
}

impl Contract {
    fn is_open(&self) -> bool {
        self.status.eq_ignore_ascii_case("open")
    }

    /// Orders are in whole lots; the multiplier is base units per lot.
    fn into_contract(self) -> Option<ContractInfo> {
        let multiplier = self.multiplier.filter(|m| *m > Decimal::ZERO)?;
        let spec = InstrumentSpec::new(0, multiplier, self.lot_size.unwrap_or(Decimal::ONE));
        Some(ContractInfo::new(self.symbol, spec))
    }
}

/// KuCoin perpetual futures adapter (market data and contract listing).
#[derive(Clone)]
pub struct KucoinFutures {
    client: HttpClient,
}

impl KucoinFutures {
    pub const VENUE: &'static str = "kucoin";

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

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FeedError> {
        let envelope: Envelope<T> = self.client.get_json(path, query).await?;
        if envelope.code != SUCCESS_CODE {
            return Err(FeedError::network(
                Self::VENUE,
                format!(
                    "code {}: {}",
                    envelope.code,
                    envelope.msg.unwrap_or_default()
                ),
            ));
        }
        envelope
            .data
            .ok_or_else(|| FeedError::malformed(Self::VENUE, "missing data field"))
    }
}

#[async_trait]
impl PriceFeed for KucoinFutures {
    fn venue(&self) -> &str {
        Self::VENUE
    }

    async fn top_of_book(&self, symbol: &str) -> Result<Quote, FeedError> {
        let ticker: Ticker = self.get_data(TICKER, &[("symbol", symbol)]).await?;

        let bid = ticker.best_bid_price.unwrap_or(Decimal::ZERO);
        let ask = ticker.best_ask_price.unwrap_or(Decimal::ZERO);
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
impl ContractSource for KucoinFutures {
    fn venue(&self) -> &str {
        Self::VENUE
    }

    async fn contracts(&self) -> Result<Vec<ContractInfo>, FeedError> {
        let listed: Vec<Contract> = self.get_data(ACTIVE_CONTRACTS, &[]).await?;
        let total = listed.len();
        let contracts: Vec<ContractInfo> = listed
            .into_iter()
            .filter(Contract::is_open)
            .filter_map(Contract::into_contract)
            .collect();
        debug!(total, open = contracts.len(), "KuCoin contracts");
        Ok(contracts)
    }
}
