//! Guard and circuit-breaker scenarios.

mod support;

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;

use trireme::core::breaker::CircuitBreaker;
use trireme::core::domain::{Cycle, Opportunity};
use trireme::core::guard::{GuardDecision, RejectionClass, TradeGuard};
use trireme::core::settings::{SettingsHandle, TradeSettings};

use support::exchange::ScriptedExchange;

fn opportunity(net_pct: rust_decimal::Decimal) -> Opportunity {
    Opportunity::new(
        Cycle::parse("USD → BTC → ETH → USD").unwrap(),
        net_pct + dec!(0.78),
        net_pct,
        100,
        Utc::now(),
    )
}

fn guard_stack() -> (Arc<SettingsHandle>, Arc<CircuitBreaker>, TradeGuard) {
    let settings = Arc::new(SettingsHandle::new(TradeSettings::default()).unwrap());
    settings.enable();
    let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&settings)));
    let guard = TradeGuard::new(
        Arc::clone(&settings),
        Arc::clone(&breaker),
        Arc::new(ScriptedExchange::new(Vec::new())),
    );
    (settings, breaker, guard)
}

#[tokio::test]
async fn accumulated_losses_break_the_circuit_and_block_events() {
    let (settings, breaker, guard) = guard_stack();

    // First losing trade stays under the $30 daily cap
    breaker.record_completed("LIVE-1", dec!(-20), dec!(100));
    let state = breaker.state();
    assert!(!state.is_broken);
    assert_eq!(state.daily_loss, dec!(20));

    // Second loss pushes the day to $35 and trips the breaker
    breaker.record_completed("LIVE-2", dec!(-15), dec!(100));
    let state = breaker.state();
    assert_eq!(state.daily_loss, dec!(35));
    assert!(state.is_broken);
    assert!(state
        .broken_reason
        .as_deref()
        .unwrap()
        .to_lowercase()
        .contains("daily"));
    assert!(!settings.get().is_enabled);

    // Further events are rejected as policy denials; the reason carries
    // the break cause
    settings.enable();
    let decision = guard.evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-3").await;
    match decision {
        GuardDecision::Rejected { class, reason } => {
            assert_eq!(class, RejectionClass::Skipped);
            assert!(reason.contains("Circuit breaker"));
            assert!(reason.to_lowercase().contains("daily"));
        }
        GuardDecision::Approved => panic!("expected rejection"),
    }
}

#[tokio::test]
async fn opportunity_events_one_millisecond_apart_execute_once() {
    let (_settings, breaker, guard) = guard_stack();

    // First event claims the execution slot
    let first = guard.evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-A").await;
    assert!(matches!(first, GuardDecision::Approved));

    // Second event arrives while the first is in flight
    let second = guard.evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-B").await;
    match second {
        GuardDecision::Rejected { class, reason } => {
            assert_eq!(class, RejectionClass::Skipped);
            assert_eq!(reason, "Trade already in progress");
        }
        GuardDecision::Approved => panic!("second event must not execute"),
    }

    // After the first trade terminates, a third event proceeds normally
    breaker.mark_execution_complete("LIVE-A");
    let third = guard.evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-C").await;
    assert!(matches!(third, GuardDecision::Approved));
}

#[tokio::test]
async fn budget_boundary_one_cent_over_is_rejected() {
    let (settings, breaker, guard) = guard_stack();

    // $20.01 of losses leaves $9.99 of daily budget against a $10 trade
    breaker.record_completed("LIVE-1", dec!(-20.01), dec!(100));
    settings.enable();

    let decision = guard.evaluate_and_claim(&opportunity(dec!(1.0)), "LIVE-2").await;
    match decision {
        GuardDecision::Rejected { class, reason } => {
            assert_eq!(class, RejectionClass::Missed);
            assert!(reason.contains("daily budget"));
        }
        GuardDecision::Approved => panic!("expected rejection"),
    }
}
