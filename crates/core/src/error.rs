//! Error types for market data and order routing.

use thiserror::Error;

/// Errors raised while reading top-of-book data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("{venue}: request timed out")]
    Timeout { venue: String },

    #[error("{venue}: network error: {message}")]
    Network { venue: String, message: String },

    #[error("{venue}: rate limited")]
    RateLimited { venue: String },

    #[error("{venue}: malformed response: {message}")]
    Malformed { venue: String, message: String },

    #[error("{venue}: invalid quote for {symbol} (bid {bid}, ask {ask})")]
    InvalidQuote {
        venue: String,
        symbol: String,
        bid: String,
        ask: String,
    },

    #[error("{venue}: unknown symbol {symbol}")]
    UnknownSymbol { venue: String, symbol: String },
}

impl FeedError {
    pub fn network(venue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            venue: venue.into(),
            message: message.into(),
        }
    }

    pub fn malformed(venue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            venue: venue.into(),
            message: message.into(),
        }
    }

    pub fn unknown_symbol(venue: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::UnknownSymbol {
            venue: venue.into(),
            symbol: symbol.into(),
        }
    }

    /// Returns true if a later poll may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::RateLimited { .. }
        )
    }
}

/// Errors raised by an order gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{venue}: request timed out")]
    Timeout { venue: String },

    #[error("{venue}: network error: {message}")]
    Network { venue: String, message: String },

    #[error("{venue}: rate limited")]
    RateLimited { venue: String },

    #[error("{venue}: order rejected: {reason}")]
    Rejected { venue: String, reason: String },

    #[error("{venue}: invalid order: {reason}")]
    InvalidOrder { venue: String, reason: String },

    #[error("{venue}: order {order_id} not found")]
    OrderNotFound { venue: String, order_id: String },

    #[error("{venue}: api error {code}: {message}")]
    Api {
        venue: String,
        code: String,
        message: String,
    },
}

impl GatewayError {
    pub fn timeout(venue: impl Into<String>) -> Self {
        Self::Timeout {
            venue: venue.into(),
        }
    }

    pub fn network(venue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            venue: venue.into(),
            message: message.into(),
        }
    }

    pub fn rejected(venue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            venue: venue.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_order(venue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            venue: venue.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the same request may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::RateLimited { .. }
        )
    }
}
