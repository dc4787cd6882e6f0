//! Scripted price feed and symbol source for simulations and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use spread_arb_core::{FeedError, PriceFeed, Quote, SymbolSource, TradingPair};

#[derive(Default)]
struct SymbolScript {
    queue: VecDeque<Result<Quote, FeedError>>,
    last: Option<Quote>,
}

/// A [`PriceFeed`] that replays queued quotes per symbol.
///
/// Each `top_of_book` call pops the next queued entry. Once a symbol's queue
/// is empty the last successfully returned (or explicitly set) quote is
/// repeated. Non-positive quotes are rejected the way a live feed would.
pub struct ScriptedFeed {
    venue: String,
    scripts: Mutex<HashMap<String, SymbolScript>>,
}

impl ScriptedFeed {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            scripts: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the quote repeated once the queue is drained.
    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.scripts.lock().entry(symbol.to_string()).or_default().last = Some(Quote::new(bid, ask));
    }

    pub fn push_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.push(symbol, Ok(Quote::new(bid, ask)));
    }

    pub fn push_quotes(&self, symbol: &str, quotes: impl IntoIterator<Item = (Decimal, Decimal)>) {
        for (bid, ask) in quotes {
            self.push_quote(symbol, bid, ask);
        }
    }

    /// Queues a transient network failure.
    pub fn push_error(&self, symbol: &str) {
        self.push(symbol, Err(FeedError::network(&self.venue, "scripted failure")));
    }

    /// Number of queued entries not yet consumed.
    pub fn pending(&self, symbol: &str) -> usize {
        self.scripts
            .lock()
            .get(symbol)
            .map_or(0, |script| script.queue.len())
    }

    fn push(&self, symbol: &str, entry: Result<Quote, FeedError>) {
        self.scripts
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .queue
            .push_back(entry);
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn top_of_book(&self, symbol: &str) -> Result<Quote, FeedError> {
        let mut scripts = self.scripts.lock();
        let script = scripts
            .get_mut(symbol)
            .ok_or_else(|| FeedError::unknown_symbol(&self.venue, symbol))?;

        let quote = match script.queue.pop_front() {
            Some(Ok(quote)) => {
                script.last = Some(quote);
                quote
            }
            Some(Err(e)) => return Err(e),
            None => script
                .last
                .ok_or_else(|| FeedError::unknown_symbol(&self.venue, symbol))?,
        };

        if !quote.is_valid() {
            return Err(FeedError::InvalidQuote {
                venue: self.venue.clone(),
                symbol: symbol.to_string(),
                bid: quote.bid.to_string(),
                ask: quote.ask.to_string(),
            });
        }
        Ok(quote)
    }
}

/// A [`SymbolSource`] with a fixed pair list.
pub struct StaticSymbols {
    pairs: Vec<TradingPair>,
}

impl StaticSymbols {
    pub fn new(pairs: Vec<TradingPair>) -> Self {
        Self { pairs }
    }
}

#[async_trait]
impl SymbolSource for StaticSymbols {
    async fn trading_pairs(&self) -> Result<Vec<TradingPair>, FeedError> {
        Ok(self.pairs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_replays_queue_then_repeats_last() {
        let feed = ScriptedFeed::new("a");
        feed.push_quotes("BTCUSDT", [(dec!(1), dec!(2)), (dec!(3), dec!(4))]);
        assert_eq!(feed.top_of_book("BTCUSDT").await.unwrap().bid, dec!(1));
        assert_eq!(feed.top_of_book("BTCUSDT").await.unwrap().bid, dec!(3));
        assert_eq!(feed.top_of_book("BTCUSDT").await.unwrap().bid, dec!(3));
        assert_eq!(feed.pending("BTCUSDT"), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_quotes_and_unknown_symbols() {
        let feed = ScriptedFeed::new("a");
        feed.push_quote("ETHUSDT", dec!(0), dec!(2));
        assert!(matches!(
            feed.top_of_book("ETHUSDT").await,
            Err(FeedError::InvalidQuote { .. })
        ));
        assert!(matches!(
            feed.top_of_book("SOLUSDT").await,
            Err(FeedError::UnknownSymbol { .. })
        ));
    }
}
