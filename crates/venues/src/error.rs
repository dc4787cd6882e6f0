use thiserror::Error;

/// Errors raised while constructing venue adapters.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("unknown venue kind {0:?} (expected \"binance\" or \"kucoin\")")]
    UnknownKind(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
