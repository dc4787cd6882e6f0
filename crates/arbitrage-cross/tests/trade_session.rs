//! Full trade sessions: entry, exit confirmation, close and liquidation.

mod common;

use std::time::Duration;

use rust_decimal_macros::dec;

use common::{fast_config, pair, Harness, SYMBOL};
use spread_arb_core::{Direction, Leg, LifecycleState, TradeEvent};
use spread_arb_cross::{LifecycleError, TradeOutcome, TradeSession};

#[tokio::test]
async fn test_round_trip_exits_after_three_consecutive_passes() {
    let mut harness = Harness::new(fast_config()).with_entry_fills();
    // Entry: 6.0% three times. Basis is 6.0% (trigger and realized agree).
    // Exit spread is (B ask - A bid 9.99) / 10.00, so captured runs
    // 2.3, 2.6, 2.7, 2.8 for these asks.
    harness.market.a.set_quote(SYMBOL, dec!(9.99), dec!(10.00));
    harness.market.b.push_quotes(
        SYMBOL,
        [
            (dec!(10.60), dec!(10.61)),
            (dec!(10.60), dec!(10.61)),
            (dec!(10.60), dec!(10.61)),
            (dec!(10.35), dec!(10.36)),
            (dec!(10.32), dec!(10.33)),
            (dec!(10.31), dec!(10.32)),
            (dec!(10.30), dec!(10.31)),
        ],
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        TradeSession::new(harness.ctx.clone(), pair(), Direction::LongAShortB).run(),
    )
    .await
    .expect("session finished");

    let TradeOutcome::Closed(summary) = outcome else {
        panic!("expected a closed trade, got {outcome:?}");
    };
    assert!(!summary.forced);
    assert_eq!(summary.entry_basis_pct, dec!(6));
    // Fired on the third consecutive pass, not the first.
    assert_eq!(summary.captured_spread_pct, Some(dec!(2.8)));
    assert_eq!(summary.exit_spread_pct, Some(dec!(3.2)));
    assert_eq!(summary.net_pnl, summary.gross_pnl + summary.funding - summary.fees);

    assert_eq!(harness.positions(), (dec!(0), dec!(0)));
    assert!(!harness.ctx.lifecycle.is_locked());
    assert!(!harness.ctx.lifecycle.is_halted());
    assert_eq!(harness.ctx.lifecycle.state(), LifecycleState::Idle);

    let events = harness.drain_events();
    let exit_progress: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            TradeEvent::ExitConfirmProgress { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(exit_progress, vec![1, 2]);
    assert!(events
        .iter()
        .any(|e| matches!(e, TradeEvent::TradeClosed(s) if !s.forced)));

    let states: Vec<(LifecycleState, LifecycleState)> = events
        .iter()
        .filter_map(|e| match e {
            TradeEvent::StateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert!(states.contains(&(LifecycleState::Idle, LifecycleState::EntryConfirming)));
    assert!(states.contains(&(LifecycleState::Entering, LifecycleState::Open)));
    assert!(states.contains(&(LifecycleState::Closing, LifecycleState::Idle)));
}

#[tokio::test]
async fn test_liquidation_closes_survivor_and_halts() {
    let harness = Harness::new(fast_config()).with_entry_fills();
    // Enter at 6.0%, then sit at a spread that never reaches the exit.
    harness.market.a.set_quote(SYMBOL, dec!(9.99), dec!(10.00));
    harness.market.b.push_quotes(
        SYMBOL,
        [
            (dec!(10.60), dec!(10.61)),
            (dec!(10.60), dec!(10.61)),
            (dec!(10.60), dec!(10.61)),
        ],
    );

    let ctx = harness.ctx.clone();
    let session = tokio::spawn(TradeSession::new(ctx, pair(), Direction::LongAShortB).run());

    harness.wait_for_state(LifecycleState::Open).await;
    // Let the watcher see both legs non-zero before leg A disappears.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(harness.gateways.a.position(SYMBOL) > dec!(0));
    harness.gateways.a.set_position(SYMBOL, dec!(0));

    let outcome = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session finished")
        .expect("session task");

    let TradeOutcome::ForceClosed {
        liquidated,
        summary,
    } = outcome
    else {
        panic!("expected a forced close, got {outcome:?}");
    };
    assert_eq!(liquidated, Leg::A);
    assert!(summary.forced);
    assert_eq!(summary.captured_spread_pct, None);

    // The short survivor was bought back with a reduce-only order.
    assert_eq!(harness.gateways.b.position(SYMBOL), dec!(0));
    let closes: Vec<_> = harness
        .gateways
        .b
        .orders()
        .into_iter()
        .filter(|o| o.request.reduce_only)
        .collect();
    assert!(!closes.is_empty());

    assert!(harness.ctx.lifecycle.is_halted());
    assert!(!harness.ctx.lifecycle.is_locked());
    assert_eq!(harness.ctx.lifecycle.state(), LifecycleState::Idle);

    // No further entries for the rest of the process.
    let again = TradeSession::new(harness.ctx.clone(), pair(), Direction::LongAShortB)
        .run()
        .await;
    assert!(matches!(
        again,
        TradeOutcome::NotStarted(LifecycleError::Halted { .. })
    ));
}

#[tokio::test]
async fn test_transient_zero_reading_does_not_liquidate() {
    let harness = Harness::new(fast_config()).with_entry_fills();
    harness.market.a.set_quote(SYMBOL, dec!(9.99), dec!(10.00));
    harness.market.b.push_quotes(
        SYMBOL,
        [
            (dec!(10.60), dec!(10.61)),
            (dec!(10.60), dec!(10.61)),
            (dec!(10.60), dec!(10.61)),
        ],
    );

    let ctx = harness.ctx.clone();
    let session = tokio::spawn(TradeSession::new(ctx, pair(), Direction::LongAShortB).run());

    harness.wait_for_state(LifecycleState::Open).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    // One glitched zero, then the real position again.
    harness
        .gateways
        .a
        .script_positions(SYMBOL, [Ok(dec!(0))]);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!harness.ctx.lifecycle.is_halted());

    // Converge so the session exits normally.
    harness.market.b.set_quote(SYMBOL, dec!(9.99), dec!(10.00));
    let outcome = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session finished")
        .expect("session task");

    assert!(matches!(outcome, TradeOutcome::Closed(_)));
    assert!(!harness.ctx.lifecycle.is_halted());
    assert_eq!(harness.positions(), (dec!(0), dec!(0)));
}
