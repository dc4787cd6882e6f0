//! Single-position lifecycle and the global trade lock.
//!
//! At most one cross-venue position may exist at a time, across all symbols.
//! [`PositionLifecycle`] owns that invariant:
//!
//! - [`PositionLifecycle::try_acquire`] hands out the process-wide
//!   [`TradeGuard`] without blocking. A second caller is refused immediately.
//! - The state machine only accepts the transitions listed in
//!   [`LifecycleState::can_transition_to`]; everything else is an error.
//! - `begin_close` and `begin_force_close` are compare-and-set operations, so
//!   a normal exit and the liquidation watcher can never both claim the close.
//! - A halt flag, set after a liquidation, refuses all further entries.
//!
//! Dropping the guard returns the lifecycle to `Idle` and releases the lock.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use spread_arb_core::{EventSink, LifecycleState, Position, TradeEvent};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("trade lock held by {holder}")]
    TradeLockHeld { holder: String },

    #[error("trading halted: {reason}")]
    Halted { reason: String },

    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("no position is open")]
    NoPosition,
}

#[derive(Debug)]
struct Inner {
    state: LifecycleState,
    holder: Option<String>,
    position: Option<Position>,
    halt_reason: Option<String>,
}

/// Global single-position state machine.
#[derive(Debug)]
pub struct PositionLifecycle {
    locked: AtomicBool,
    halted: AtomicBool,
    inner: RwLock<Inner>,
    events: EventSink,
}

impl Default for PositionLifecycle {
    fn default() -> Self {
        Self::new(EventSink::disabled())
    }
}

impl PositionLifecycle {
    pub fn new(events: EventSink) -> Self {
        Self {
            locked: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            inner: RwLock::new(Inner {
                state: LifecycleState::Idle,
                holder: None,
                position: None,
                halt_reason: None,
            }),
            events,
        }
    }

    // ==================== Trade Lock ====================

    /// Claims the global trade lock for `symbol` without waiting.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Halted`] after a liquidation, or
    /// [`LifecycleError::TradeLockHeld`] if another trade is in progress.
    pub fn try_acquire(self: &Arc<Self>, symbol: &str) -> Result<TradeGuard, LifecycleError> {
        if let Some(reason) = self.halt_reason() {
            return Err(LifecycleError::Halted { reason });
        }
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let holder = self
                .inner
                .read()
                .holder
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LifecycleError::TradeLockHeld { holder });
        }
        self.inner.write().holder = Some(symbol.to_string());
        debug!(symbol, "Trade lock acquired");
        Ok(TradeGuard {
            lifecycle: Arc::clone(self),
            symbol: symbol.to_string(),
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn release(&self, symbol: &str) {
        let mut inner = self.inner.write();
        if inner.state != LifecycleState::Idle {
            warn!(symbol, state = %inner.state, "Trade lock released outside IDLE, resetting");
        }
        inner.state = LifecycleState::Idle;
        inner.position = None;
        inner.holder = None;
        drop(inner);
        self.locked.store(false, Ordering::SeqCst);
        debug!(symbol, "Trade lock released");
    }

    // ==================== Halt ====================

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn halt_reason(&self) -> Option<String> {
        if !self.is_halted() {
            return None;
        }
        Some(
            self.inner
                .read()
                .halt_reason
                .clone()
                .unwrap_or_else(|| "halted".to_string()),
        )
    }

    /// Refuses all further entries. Irreversible for the life of the process.
    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "TRADING HALTED");
        self.inner.write().halt_reason = Some(reason);
        self.halted.store(true, Ordering::SeqCst);
    }

    // ==================== State ====================

    pub fn state(&self) -> LifecycleState {
        self.inner.read().state
    }

    /// Copy of the open position, if any.
    pub fn snapshot(&self) -> Option<Position> {
        self.inner.read().position.clone()
    }

    /// Moves to `to` if the transition is legal. Returns the previous state.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] for any transition not in the
    /// lifecycle table.
    pub fn transition(&self, to: LifecycleState) -> Result<LifecycleState, LifecycleError> {
        let mut inner = self.inner.write();
        let from = inner.state;
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        inner.state = to;
        if to == LifecycleState::Idle {
            inner.position = None;
        } else if let Some(position) = inner.position.as_mut() {
            position.state = to;
        }
        drop(inner);
        self.announce(from, to);
        Ok(from)
    }

    /// Records a freshly filled position and moves `Entering -> Open`.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] unless currently `Entering`.
    pub fn open_position(&self, mut position: Position) -> Result<(), LifecycleError> {
        let mut inner = self.inner.write();
        let from = inner.state;
        if from != LifecycleState::Entering {
            return Err(LifecycleError::InvalidTransition {
                from,
                to: LifecycleState::Open,
            });
        }
        position.state = LifecycleState::Open;
        inner.state = LifecycleState::Open;
        inner.position = Some(position);
        drop(inner);
        self.announce(from, LifecycleState::Open);
        Ok(())
    }

    /// Claims a normal close. Fails if a close of either kind already started.
    pub fn begin_close(&self) -> bool {
        self.claim_close(LifecycleState::Closing, None)
    }

    /// Claims a forced close for `position_id`. Fails if the position has
    /// changed or a close already started.
    pub fn begin_force_close(&self, position_id: Uuid) -> bool {
        self.claim_close(LifecycleState::ForceClosing, Some(position_id))
    }

    fn claim_close(&self, to: LifecycleState, position_id: Option<Uuid>) -> bool {
        let mut inner = self.inner.write();
        let from = inner.state;
        if !matches!(from, LifecycleState::Open | LifecycleState::ExitConfirming) {
            return false;
        }
        if let Some(id) = position_id {
            if inner.position.as_ref().map(|p| p.id) != Some(id) {
                return false;
            }
        }
        inner.state = to;
        if let Some(position) = inner.position.as_mut() {
            position.state = to;
        }
        drop(inner);
        self.announce(from, to);
        true
    }

    fn announce(&self, from: LifecycleState, to: LifecycleState) {
        info!(from = %from, to = %to, "Lifecycle transition");
        self.events.emit(TradeEvent::StateChanged {
            from,
            to,
            timestamp: Utc::now(),
        });
    }
}

/// Proof of holding the global trade lock.
///
/// Dropping it resets the lifecycle to `Idle` and releases the lock.
#[derive(Debug)]
pub struct TradeGuard {
    lifecycle: Arc<PositionLifecycle>,
    symbol: String,
}

impl TradeGuard {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn lifecycle(&self) -> &Arc<PositionLifecycle> {
        &self.lifecycle
    }
}

impl Drop for TradeGuard {
    fn drop(&mut self) {
        self.lifecycle.release(&self.symbol);
    }
}
