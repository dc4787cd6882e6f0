pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod position;
pub mod traits;
pub mod types;

pub use config::{
    AppConfig, ConfigError, DirectionFilter, ExecutionConfig, RunMode, ScannerConfig,
    StrategyConfig, VenueConfig, WatcherConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{FeedError, GatewayError};
pub use events::{EventSink, ExecutionSummary, LegExecution, TradeEvent, TradeSummary};
pub use position::{conservative_basis, mismatch_pct, LifecycleState, Position, PositionLeg};
pub use traits::{
    FillReport, OrderGateway, OrderHandle, OrderRequest, OrderStatus, PriceFeed, SymbolSource,
};
pub use types::{
    Direction, DirectionalSpread, Instrument, InstrumentSpec, Leg, PerLeg, Quote, Side,
    SpreadSample, TradingPair,
};
