//! End-to-end sessions: an account actor wired to a scripted venue.
//!
//! Commands are processed ahead of venue events inside the actor, so a
//! command sent after another command (or after an observed event) has a
//! deterministic place in the session. Payout ratio 1.2 makes a corridor
//! win worth +0.4 per unit staked and a breakout loss -0.8.

use std::time::Duration;

use hedgebot_core::config::{AccountConfig, AppConfig};
use hedgebot_exchange_sim::SimVenue;
use hedgebot_orchestrator::{AccountEvent, AccountHandle, AccountRegistry, AccountState};
use hedgebot_recovery::LevelId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn account(profit_target: Decimal) -> AccountConfig {
    AccountConfig {
        token: "demo-token".into(),
        account_id: "VRTC0001".into(),
        profit_target,
    }
}

fn id(s: &str) -> LevelId {
    s.parse().unwrap()
}

async fn spawn(
    config: &AppConfig,
    profit_target: Decimal,
    script: &str,
) -> (AccountHandle, broadcast::Receiver<AccountEvent>) {
    let registry = AccountRegistry::new();
    let venue = SimVenue::new(script, dec!(1.2)).unwrap();
    let handle = registry
        .spawn_account(config, account(profit_target), venue)
        .await;
    let events = handle.subscribe_events();
    (handle, events)
}

async fn wait_for(
    events: &mut broadcast::Receiver<AccountEvent>,
    mut pred: impl FnMut(&AccountEvent) -> bool,
) -> AccountEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn winning_session_reaches_its_target_and_stops_entering() {
    let config = AppConfig::default();
    let (handle, mut events) = spawn(&config, dec!(0.4), "W").await;

    handle.start().await.unwrap();
    handle.signal().await.unwrap();

    let event = wait_for(&mut events, |e| {
        matches!(e, AccountEvent::SessionTargetReached { .. })
    })
    .await;
    let AccountEvent::SessionTargetReached { total_profit } = event else {
        unreachable!()
    };
    assert_eq!(total_profit, dec!(0.4));

    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state, AccountState::TargetReached);
    assert_eq!(snapshot.total_profit, dec!(0.4));
    assert!(!snapshot.in_flight);

    // Further entries are ignored for the rest of the session.
    handle.signal().await.unwrap();
    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(!snapshot.in_flight);
}

#[tokio::test]
async fn a_loss_enters_recovery_and_a_sized_win_exits_it() {
    let config = AppConfig::default();
    let (handle, mut events) = spawn(&config, dec!(10), "WLW").await;
    handle.start().await.unwrap();

    // Base win: +0.4 becomes the reference profit.
    handle.signal().await.unwrap();
    let settled = wait_for(&mut events, |e| {
        matches!(e, AccountEvent::TradeSettled { .. })
    })
    .await;
    let AccountEvent::TradeSettled { outcome, .. } = settled else {
        unreachable!()
    };
    assert_eq!(outcome.profit, dec!(0.4));

    // Breakout loss: -0.8 opens a deficit of 0.8 + 0.4 reference margin.
    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            AccountEvent::RecoveryModeChanged {
                entered: true,
                level: None
            }
        )
    })
    .await;

    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(snapshot.is_recovery_mode);
    assert_eq!(snapshot.amount_to_recover, dec!(1.2));
    // 1 * (1.2 * 1 / 0.4) / 1 / 1 = 3.
    assert_eq!(snapshot.dynamic_stake, dec!(3.00));

    // The recovery win at stake 3 returns +1.2 and closes the deficit.
    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            AccountEvent::RecoveryModeChanged {
                entered: false,
                level: None
            }
        )
    })
    .await;

    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(!snapshot.is_recovery_mode);
    assert_eq!(snapshot.total_profit, dec!(0.8));
    assert_eq!(snapshot.amount_to_recover, Decimal::ZERO);
    assert_eq!(snapshot.dynamic_stake, dec!(1));
}

#[tokio::test]
async fn a_breached_drawdown_escalates_and_the_hierarchy_recovers_it() {
    let mut config = AppConfig::default();
    // One loss after a base win breaches the ceiling: 0.8 + 0.4 > 1.
    config.phase1.max_drawdown = dec!(1);
    // Sized so each half-share of the deficit is one corridor win.
    config.hierarchy.layer_one_stake = dec!(1.5);
    let (handle, mut events) = spawn(&config, dec!(10), "WLWW").await;
    handle.start().await.unwrap();

    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, AccountEvent::TradeSettled { .. })
    })
    .await;

    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, AccountEvent::MaxDrawdownExceeded { level: None, .. })
    })
    .await;
    wait_for(&mut events, |e| {
        matches!(
            e,
            AccountEvent::LevelTransition { from: None, to: Some(to) } if *to == id("1.1")
        )
    })
    .await;

    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.active_level_id, Some(id("1.1")));
    assert_eq!(snapshot.stake, dec!(1.5));
    assert_eq!(snapshot.total_profit, Decimal::ZERO);
    assert_eq!(snapshot.amount_to_recover, Decimal::ZERO);

    // "1.1" wins +0.6, exactly its half of the 1.2 deficit.
    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            AccountEvent::TakeProfitReached { level: Some(level), .. } if *level == id("1.1")
        )
    })
    .await;
    wait_for(&mut events, |e| {
        matches!(
            e,
            AccountEvent::LevelTransition { to: Some(to), .. } if *to == id("1.2")
        )
    })
    .await;
    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.active_level_id, Some(id("1.2")));
    assert_eq!(snapshot.total_profit, Decimal::ZERO);

    // "1.2" wins its share too: the layer covers the full deficit and the
    // hierarchy exits back to root trading.
    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            AccountEvent::LevelTransition { from: Some(from), to: None } if *from == id("1.2")
        )
    })
    .await;

    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.active_level_id, None);
    assert!(!snapshot.is_recovery_mode);
    assert_eq!(snapshot.stake, dec!(1));
    // Root keeps its own ledger: the base win and the escalated loss.
    assert_eq!(snapshot.total_profit, dec!(-0.4));
}

#[tokio::test]
async fn stop_lets_the_open_pair_settle_then_resets_to_root() {
    let config = AppConfig::default();
    let (handle, mut events) = spawn(&config, dec!(10), "L").await;
    handle.start().await.unwrap();

    // The stop lands while the pair is still pending: commands win ties
    // against queued venue events.
    handle.signal().await.unwrap();
    handle.stop().await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, AccountEvent::TradeSettled { .. })
    })
    .await;

    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state, AccountState::Stopped);
    assert_eq!(snapshot.active_level_id, None);
    assert!(!snapshot.is_recovery_mode);
    assert!(!snapshot.in_flight);
    // The late settlement still counted against the session.
    assert_eq!(snapshot.total_profit, dec!(-0.8));
}

#[tokio::test]
async fn signals_are_gated_while_stopped_pending_or_offline() {
    let config = AppConfig::default();
    let registry = AccountRegistry::new();
    let venue = SimVenue::new("WW", dec!(1.2)).unwrap();
    let control = venue.control();
    let handle = registry
        .spawn_account(&config, account(dec!(100)), venue)
        .await;
    let mut events = handle.subscribe_events();

    // Stopped: ignored.
    handle.signal().await.unwrap();
    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(!snapshot.in_flight);

    handle.start().await.unwrap();

    // Pending: the second signal arrives while the first pair is open.
    handle.signal().await.unwrap();
    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, AccountEvent::TradeSettled { .. })
    })
    .await;
    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(!snapshot.in_flight);
    // Exactly one pair traded.
    assert_eq!(snapshot.total_profit, dec!(0.4));

    // Offline: ignored until the connection returns.
    control.set_online(false);
    let mut updates = handle.snapshot_updates();
    timeout(WAIT, updates.wait_for(|s| !s.online))
        .await
        .unwrap()
        .unwrap();
    handle.signal().await.unwrap();
    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(!snapshot.in_flight);
    assert_eq!(snapshot.total_profit, dec!(0.4));

    control.set_online(true);
    timeout(WAIT, updates.wait_for(|s| s.online))
        .await
        .unwrap()
        .unwrap();
    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, AccountEvent::TradeSettled { .. })
    })
    .await;
    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.total_profit, dec!(0.8));
}

#[tokio::test]
async fn a_failed_pair_books_as_a_loss_with_no_reference_profit() {
    let config = AppConfig::default();
    let (handle, mut events) = spawn(&config, dec!(10), "F").await;
    handle.start().await.unwrap();
    handle.signal().await.unwrap();

    let settled = wait_for(&mut events, |e| {
        matches!(e, AccountEvent::TradeSettled { .. })
    })
    .await;
    let AccountEvent::TradeSettled { outcome, .. } = settled else {
        unreachable!()
    };
    assert!(outcome.failed);
    assert_eq!(outcome.profit, dec!(-1));

    let snapshot = handle.get_snapshot().await.unwrap();
    assert!(snapshot.is_recovery_mode);
    assert_eq!(snapshot.total_profit, dec!(-1));
    assert_eq!(snapshot.amount_to_recover, dec!(1));
    // One acked payout minus both stakes is negative, so no estimate stands
    // in and the stake holds rather than sizing against nothing.
    assert_eq!(snapshot.dynamic_stake, dec!(1));
    assert!(!snapshot.in_flight);
}

#[tokio::test]
async fn restart_after_the_target_begins_a_fresh_session() {
    let config = AppConfig::default();
    let (handle, mut events) = spawn(&config, dec!(0.4), "WW").await;
    handle.start().await.unwrap();
    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, AccountEvent::SessionTargetReached { .. })
    })
    .await;

    handle.start().await.unwrap();
    let snapshot = handle.get_snapshot().await.unwrap();
    assert_eq!(snapshot.state, AccountState::Running);
    assert_eq!(snapshot.total_profit, Decimal::ZERO);

    handle.signal().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, AccountEvent::SessionTargetReached { .. })
    })
    .await;
}

#[tokio::test]
async fn registry_tracks_spawned_accounts() {
    let config = AppConfig::default();
    let registry = AccountRegistry::new();
    let venue = SimVenue::new("W", dec!(1.2)).unwrap();
    let handle = registry
        .spawn_account(&config, account(dec!(10)), venue)
        .await;

    assert_eq!(registry.list().await, vec!["VRTC0001".to_string()]);
    assert!(registry.get("VRTC0001").await.is_some());

    registry.remove("VRTC0001").await.unwrap();
    assert!(registry.list().await.is_empty());
    assert!(registry.get("VRTC0001").await.is_none());

    // The actor honors the shutdown; its command channel closes.
    timeout(WAIT, async {
        loop {
            if handle.start().await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
