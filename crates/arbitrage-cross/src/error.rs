use thiserror::Error;

/// Errors that end the run loop.
///
/// Per-trade failures are reported as [`crate::TradeOutcome`]s instead; only
/// a halt (liquidation or unconfirmed exposure) stops scanning.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("trading halted: {reason}")]
    Halted { reason: String },
}

impl EngineError {
    pub fn halted(reason: impl Into<String>) -> Self {
        Self::Halted {
            reason: reason.into(),
        }
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halted_error() {
        let err = EngineError::halted("liquidation on venue-a");
        assert!(err.is_halt());
        assert_eq!(err.to_string(), "trading halted: liquidation on venue-a");
    }
}
