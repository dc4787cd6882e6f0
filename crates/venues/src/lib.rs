//! Public-market REST adapters for Binance and KuCoin perpetual futures.
//!
//! Each adapter implements [`PriceFeed`] for top-of-book reads and
//! [`ContractSource`] for listing active contracts. [`CommonSymbols`]
//! intersects two listings into the [`TradingPair`]s the scanner watches.
//!
//! Order entry is not implemented here; live trading runs on
//! `PaperGateway` fills priced from these feeds.
//!
//! # Example
//!
//! ```ignore
//! use spread_arb_venues::{connect, CommonSymbols};
//!
//! let a = connect(&config.venue_a)?;
//! let b = connect(&config.venue_b)?;
//! let symbols = CommonSymbols::new(a.contracts, b.contracts);
//! let quote = a.feed.top_of_book("BTCUSDT").await?;
//! ```
//!
//! [`TradingPair`]: spread_arb_core::TradingPair

pub mod binance;
pub mod client;
pub mod error;
pub mod kucoin;
pub mod symbols;

use std::sync::Arc;

use spread_arb_core::{PriceFeed, VenueConfig};

pub use binance::BinanceFutures;
pub use client::HttpClient;
pub use error::VenueError;
pub use kucoin::KucoinFutures;
pub use symbols::{
    intersect, normalize_symbol, CommonSymbols, ContractInfo, ContractSource, Intersection,
};

/// Market data and contract listing for one configured venue.
#[derive(Clone)]
pub struct VenueHandle {
    pub feed: Arc<dyn PriceFeed>,
    pub contracts: Arc<dyn ContractSource>,
}

/// Builds the adapter named by `config.kind`.
///
/// # Errors
///
/// Returns [`VenueError::UnknownKind`] for anything other than `binance` or
/// `kucoin`, or [`VenueError::Client`] if the HTTP client cannot be built.
pub fn connect(config: &VenueConfig) -> Result<VenueHandle, VenueError> {
    match config.kind.to_ascii_lowercase().as_str() {
        "binance" => {
            let adapter = Arc::new(BinanceFutures::new(config)?);
            Ok(VenueHandle {
                feed: adapter.clone(),
                contracts: adapter,
            })
        }
        "kucoin" => {
            let adapter = Arc::new(KucoinFutures::new(config)?);
            Ok(VenueHandle {
                feed: adapter.clone(),
                contracts: adapter,
            })
        }
        other => Err(VenueError::UnknownKind(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_by_kind() {
        let binance = connect(&VenueConfig::binance()).unwrap();
        assert_eq!(binance.feed.venue(), "binance");
        assert_eq!(binance.contracts.venue(), "binance");

        let kucoin = connect(&VenueConfig::kucoin()).unwrap();
        assert_eq!(kucoin.feed.venue(), "kucoin");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let config = VenueConfig {
            kind: "bybit".to_string(),
            ..VenueConfig::binance()
        };
        assert!(matches!(connect(&config), Err(VenueError::UnknownKind(k)) if k == "bybit"));
    }
}
