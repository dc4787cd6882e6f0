//! Symbol normalization and common-symbol discovery.
//!
//! Venues name the same perpetual differently (`BTCUSDT` vs `XBTUSDTM`).
//! Both venues' active contracts are normalized to a canonical id and
//! intersected; each resulting [`TradingPair`] keeps the raw per-venue ids
//! and lot rules.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use spread_arb_core::{FeedError, Instrument, InstrumentSpec, SymbolSource, TradingPair};

/// An active contract as listed by a venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInfo {
    /// Venue-native symbol.
    pub symbol: String,
    pub spec: InstrumentSpec,
}

impl ContractInfo {
    pub fn new(symbol: impl Into<String>, spec: InstrumentSpec) -> Self {
        Self {
            symbol: symbol.into(),
            spec,
        }
    }
}

/// Lists a venue's tradable perpetual contracts.
#[async_trait]
pub trait ContractSource: Send + Sync {
    fn venue(&self) -> &str;

    async fn contracts(&self) -> Result<Vec<ContractInfo>, FeedError>;
}

/// Maps a venue symbol to the canonical id used to pair venues.
///
/// Upper-cases, turns `USDTM`/`USDTP` into `USDT`, drops any other trailing
/// `M`, and aliases `XBT` to `BTC`.
pub fn normalize_symbol(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let stripped = if let Some(base) = upper
        .strip_suffix("USDTM")
        .or_else(|| upper.strip_suffix("USDTP"))
    {
        format!("{base}USDT")
    } else if let Some(base) = upper.strip_suffix('M') {
        base.to_string()
    } else {
        upper.clone()
    };

    match stripped.strip_prefix("XBT") {
        Some(rest) => format!("BTC{rest}"),
        None => stripped,
    }
}

/// Result of intersecting two venues' contract lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Intersection {
    /// Sorted by canonical id.
    pub pairs: Vec<TradingPair>,
    /// Contracts dropped because an earlier one normalized to the same id.
    pub duplicates: usize,
}

fn index_by_canonical(contracts: Vec<ContractInfo>) -> (HashMap<String, ContractInfo>, usize) {
    let mut index: HashMap<String, ContractInfo> = HashMap::new();
    let mut duplicates = 0;
    for contract in contracts {
        let canonical = normalize_symbol(&contract.symbol);
        match index.get(&canonical) {
            Some(existing) if existing.symbol != contract.symbol => duplicates += 1,
            Some(_) => {}
            None => {
                index.insert(canonical, contract);
            }
        }
    }
    (index, duplicates)
}

/// Pairs contracts listed on both venues. The first raw id wins when two
/// contracts on one venue normalize to the same canonical id.
pub fn intersect(a: Vec<ContractInfo>, b: Vec<ContractInfo>) -> Intersection {
    let (a_index, a_duplicates) = index_by_canonical(a);
    let (mut b_index, b_duplicates) = index_by_canonical(b);

    let mut common: BTreeMap<String, TradingPair> = BTreeMap::new();
    for (canonical, a_contract) in a_index {
        if let Some(b_contract) = b_index.remove(&canonical) {
            let pair = TradingPair::new(
                canonical.clone(),
                Instrument::new(a_contract.symbol, a_contract.spec),
                Instrument::new(b_contract.symbol, b_contract.spec),
            );
            common.insert(canonical, pair);
        }
    }

    Intersection {
        pairs: common.into_values().collect(),
        duplicates: a_duplicates + b_duplicates,
    }
}

/// [`SymbolSource`] over two venues' contract listings.
pub struct CommonSymbols {
    a: Arc<dyn ContractSource>,
    b: Arc<dyn ContractSource>,
}

impl CommonSymbols {
    pub fn new(a: Arc<dyn ContractSource>, b: Arc<dyn ContractSource>) -> Self {
        Self { a, b }
    }
}

#[async_trait]
impl SymbolSource for CommonSymbols {
    async fn trading_pairs(&self) -> Result<Vec<TradingPair>, FeedError> {
        let (a, b) = tokio::join!(self.a.contracts(), self.b.contracts());
        let (a, b) = (a?, b?);
        let (a_count, b_count) = (a.len(), b.len());

        let intersection = intersect(a, b);
        if intersection.duplicates > 0 {
            warn!(
                duplicates = intersection.duplicates,
                "Duplicate normalized symbols detected (kept first)"
            );
        }
        let sample: Vec<&str> = intersection
            .pairs
            .iter()
            .take(8)
            .map(|p| p.canonical.as_str())
            .collect();
        info!(
            venue_a = self.a.venue(),
            venue_b = self.b.venue(),
            a_contracts = a_count,
            b_contracts = b_count,
            common = intersection.pairs.len(),
            sample = ?sample,
            "Common symbols"
        );
        Ok(intersection.pairs)
    }
}
