mod common;

use common::{Harness, single_cycle_config};
use escrow_cycle::application::registry::CycleState;
use escrow_cycle::application::shutdown::StopSignal;
use escrow_cycle::config::EscrowConfig;
use escrow_cycle::domain::compounding::Growth;
use escrow_cycle::domain::escrow::OwnerId;
use escrow_cycle::domain::events::{EscrowEvent, StopReason};
use escrow_cycle::domain::ports::EscrowStore;
use escrow_cycle::error::TransferError;
use rust_decimal_macros::dec;
use std::time::Duration;

fn transient(n: usize) -> Vec<TransferError> {
    (0..n)
        .map(|i| TransferError::Transient(format!("timeout {i}")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle_splits_and_settles() {
    let harness = Harness::new(single_cycle_config());
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(1000)).unwrap();

    let report = harness.scheduler.release_tick(&StopSignal::never()).await;

    assert_eq!(report.released, 1);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.settled, 1);
    assert_eq!(
        harness
            .gateway
            .delivered_to(&harness.allocation_destination()),
        dec!(10)
    );
    assert_eq!(
        harness.gateway.delivered_to(&harness.feedback_destination()),
        dec!(30)
    );

    let task = harness.scheduler.registry().get(&alice).unwrap();
    assert_eq!(task.state, CycleState::Stopped);
    assert_eq!(task.stop_reason, Some(StopReason::CycleLimit));
    assert_eq!(task.delivered + task.settled, dec!(1000));
    assert_eq!(harness.store.balance(&alice), dec!(0));
}

#[tokio::test(start_paused = true)]
async fn test_remainder_is_reheld_for_next_cycle() {
    let harness = Harness::new(EscrowConfig {
        hold_seconds: 0,
        ..EscrowConfig::default()
    });
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(1000)).unwrap();

    let first = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert_eq!(first.reheld, 1);
    assert_eq!(harness.store.balance(&alice), dec!(960));

    let second = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert_eq!(second.released, 1);
    assert_eq!(harness.store.balance(&alice), dec!(921.6));

    let task = harness.scheduler.registry().get(&alice).unwrap();
    assert_eq!(task.cycles, 2);
    assert_eq!(task.state, CycleState::ReHeld);
    assert_eq!(task.delivered, dec!(78.4));
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_succeeds_is_delivered_not_requeued() {
    let harness = Harness::new(single_cycle_config());
    let destination = harness.allocation_destination();
    harness.gateway.fail_with(&destination, transient(2));
    harness
        .scheduler
        .deposit(&OwnerId::from("alice"), dec!(1000))
        .unwrap();

    let report = harness.scheduler.release_tick(&StopSignal::never()).await;

    assert_eq!(report.delivered, 2);
    assert_eq!(report.requeued, 0);
    assert!(harness.scheduler.pending_transfers().is_empty());
    assert!(harness.scheduler.review_queue().is_empty());
    assert_eq!(harness.gateway.delivered_to(&destination), dec!(10));
    assert!(harness.notifier.events().iter().any(|event| matches!(
        event,
        EscrowEvent::Delivered { destination: d, attempts: 3, .. } if *d == destination
    )));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_allocation_is_requeued_then_reviewed() {
    let harness = Harness::new(EscrowConfig {
        max_retry_attempts: 1,
        max_requeue_cycles: 2,
        ..single_cycle_config()
    });
    let destination = harness.allocation_destination();
    harness.gateway.fail_with(&destination, transient(10));
    harness
        .scheduler
        .deposit(&OwnerId::from("alice"), dec!(1000))
        .unwrap();

    let first = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert_eq!(first.requeued, 1);
    assert_eq!(harness.scheduler.pending_transfers()[0].requeues, 1);

    let second = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert_eq!(second.requeued, 1);
    assert_eq!(harness.scheduler.pending_transfers()[0].requeues, 2);

    let third = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert_eq!(third.reviewed, 1);
    assert!(harness.scheduler.pending_transfers().is_empty());

    let review = harness.scheduler.review_queue();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].amount, dec!(10));
    assert_eq!(review[0].destination, destination);
    assert!(harness.notifier.events().iter().any(|event| matches!(
        event,
        EscrowEvent::SentToReview { reason, .. } if reason == "re-queue limit reached"
    )));
    assert_eq!(harness.gateway.delivered_to(&destination), dec!(0));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_goes_straight_to_review() {
    let harness = Harness::new(single_cycle_config());
    let destination = harness.feedback_destination();
    harness.gateway.fail_with(
        &destination,
        [TransferError::Permanent("invalid destination".to_string())],
    );
    harness
        .scheduler
        .deposit(&OwnerId::from("alice"), dec!(1000))
        .unwrap();

    let report = harness.scheduler.release_tick(&StopSignal::never()).await;

    assert_eq!(report.reviewed, 1);
    assert_eq!(report.delivered, 1);
    // one call per allocation, no retries for the permanent failure
    assert_eq!(harness.gateway.calls(), 2);
    assert!(harness.scheduler.pending_transfers().is_empty());
    assert_eq!(harness.scheduler.review_queue()[0].amount, dec!(30));
}

#[tokio::test(start_paused = true)]
async fn test_entries_not_yet_due_stay_held() {
    let harness = Harness::new(EscrowConfig {
        hold_seconds: 10,
        ..EscrowConfig::default()
    });
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(500)).unwrap();

    tokio::time::advance(Duration::from_millis(9_999)).await;
    let early = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert!(early.is_empty());
    assert_eq!(harness.store.balance(&alice), dec!(500));

    tokio::time::advance(Duration::from_millis(1)).await;
    let due = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert_eq!(due.released, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_owner_settles_instead_of_reholding() {
    let harness = Harness::new(EscrowConfig {
        hold_seconds: 0,
        ..EscrowConfig::default()
    });
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(1000)).unwrap();
    assert!(harness.scheduler.cancel_owner(&alice));
    assert!(!harness.scheduler.cancel_owner(&alice));

    let report = harness.scheduler.release_tick(&StopSignal::never()).await;

    assert_eq!(report.released, 1);
    assert_eq!(report.reheld, 0);
    let task = harness.scheduler.registry().get(&alice).unwrap();
    assert_eq!(task.stop_reason, Some(StopReason::Cancelled));
    assert_eq!(task.settled, dec!(960));
    assert_eq!(harness.store.balance(&alice), dec!(0));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_entry_removes_it_before_release() {
    let harness = Harness::new(single_cycle_config());
    let alice = OwnerId::from("alice");
    let entry = harness.scheduler.deposit(&alice, dec!(1000)).unwrap();

    assert!(harness.scheduler.cancel_entry(&alice, entry));
    assert!(!harness.scheduler.cancel_entry(&alice, entry));

    let report = harness.scheduler.release_tick(&StopSignal::never()).await;
    assert_eq!(report.released, 0);
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_deposit_leaves_no_trace() {
    let harness = Harness::new(EscrowConfig {
        max_entry_limit: dec!(1_000_000),
        ..EscrowConfig::default()
    });
    let bob = OwnerId::from("bob");

    assert!(harness.scheduler.deposit(&bob, dec!(1_500_000)).is_err());
    assert!(harness.scheduler.deposit(&bob, dec!(0)).is_err());

    assert_eq!(harness.store.balance(&bob), dec!(0));
    assert!(harness.scheduler.registry().get(&bob).is_none());
    assert!(harness.notifier.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_compound_tick_grows_up_to_cap() {
    let harness = Harness::new(EscrowConfig {
        hold_seconds: 3600,
        global_cap: dec!(2500),
        max_entry_limit: dec!(1000),
        growth: Growth::Multiplier { factor: dec!(3) },
        ..EscrowConfig::default()
    });
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(1000)).unwrap();

    assert_eq!(harness.scheduler.compound_tick(), 1);
    assert_eq!(harness.store.balance(&alice), dec!(2500));
    assert_eq!(harness.store.entries(&alice).len(), 3);
    assert!(harness.notifier.events().contains(&EscrowEvent::Amplified {
        owner: alice.clone(),
        from: dec!(1000),
        to: dec!(2500),
    }));

    let task = harness.scheduler.registry().get(&alice).unwrap();
    assert_eq!(task.stop_reason, Some(StopReason::CapReached));
    assert_eq!(harness.scheduler.compound_tick(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flat_growth_adds_nothing() {
    let harness = Harness::new(EscrowConfig {
        hold_seconds: 3600,
        ..EscrowConfig::default()
    });
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(1000)).unwrap();

    assert_eq!(harness.scheduler.compound_tick(), 0);
    assert_eq!(harness.store.balance(&alice), dec!(1000));
    assert!(harness.scheduler.registry().is_active(&alice));
}

#[tokio::test(start_paused = true)]
async fn test_spawned_loops_stop_on_request() {
    let harness = Harness::new(EscrowConfig {
        hold_seconds: 0,
        release_tick_interval: Duration::from_secs(1),
        ..EscrowConfig::default()
    });
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(1000)).unwrap();

    let handle = std::sync::Arc::clone(&harness.scheduler).spawn();
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.stop().await;

    let cycles_at_stop = harness.scheduler.registry().get(&alice).unwrap().cycles;
    assert_eq!(cycles_at_stop, 1);
    assert_eq!(harness.store.balance(&alice), dec!(960));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let task = harness.scheduler.registry().get(&alice).unwrap();
    assert_eq!(task.cycles, cycles_at_stop);
    assert_eq!(harness.store.balance(&alice), dec!(960));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_keeps_transfer_pending() {
    let harness = Harness::new(EscrowConfig {
        retry_base_delay: Duration::from_secs(10),
        ..single_cycle_config()
    });
    let destination = harness.allocation_destination();
    harness.gateway.fail_with(&destination, transient(5));
    harness
        .scheduler
        .deposit(&OwnerId::from("alice"), dec!(1000))
        .unwrap();

    let (trigger, signal) = escrow_cycle::application::shutdown::stop_channel();
    let scheduler = std::sync::Arc::clone(&harness.scheduler);
    let tick = tokio::spawn(async move { scheduler.release_tick(&signal).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    trigger.stop();
    let report = tick.await.unwrap();

    assert_eq!(report.requeued, 1);
    let pending = harness.scheduler.pending_transfers();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].requeues, 0);
    assert!(pending[0].last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_batch_entries_back_off_concurrently() {
    let harness = Harness::new(EscrowConfig {
        retry_base_delay: Duration::from_secs(10),
        ..single_cycle_config()
    });
    let destination = harness.allocation_destination();
    // each entry's allocation fails twice before going through
    harness.gateway.fail_with(&destination, transient(4));
    harness
        .scheduler
        .deposit(&OwnerId::from("alice"), dec!(1000))
        .unwrap();
    harness
        .scheduler
        .deposit(&OwnerId::from("bob"), dec!(1000))
        .unwrap();

    let started = tokio::time::Instant::now();
    let report = harness.scheduler.release_tick(&StopSignal::never()).await;

    assert_eq!(report.released, 2);
    assert_eq!(report.delivered, 4);
    assert_eq!(report.requeued, 0);
    // 10s + 20s of backoff, shared by both entries
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(harness.gateway.delivered_to(&destination), dec!(20));
}

#[tokio::test(start_paused = true)]
async fn test_deposit_for_stopped_owner_settles_on_release() {
    let harness = Harness::new(EscrowConfig {
        hold_seconds: 0,
        ..EscrowConfig::default()
    });
    let alice = OwnerId::from("alice");
    harness.scheduler.deposit(&alice, dec!(100)).unwrap();
    harness.scheduler.cancel_owner(&alice);

    harness.scheduler.deposit(&alice, dec!(1000)).unwrap();
    assert_eq!(harness.store.balance(&alice), dec!(1100));

    let report = harness.scheduler.release_tick(&StopSignal::never()).await;

    assert_eq!(report.released, 2);
    assert_eq!(report.reheld, 0);
    assert_eq!(report.settled, 2);
    let task = harness.scheduler.registry().get(&alice).unwrap();
    assert_eq!(task.state, CycleState::Stopped);
    assert_eq!(task.stop_reason, Some(StopReason::Cancelled));
    assert_eq!(task.delivered, dec!(44));
    assert_eq!(task.settled, dec!(1056));
    assert_eq!(harness.store.balance(&alice), dec!(0));
}
