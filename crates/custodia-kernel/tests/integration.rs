//! Integration tests for the custodia-kernel crate.
//!
//! These tests exercise the scheduler together with the reentrancy guard and
//! the clock abstraction, the way the runtime wires them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use custodia_kernel::{Clock, InFlight, ManualClock, Scheduler, TaskStatus, job};

// ═══════════════════════════════════════════════════════════════════════
//  Scheduler integration
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn independent_jobs_tick_at_their_own_rate() {
    let scheduler = Scheduler::new();
    let fast = Arc::new(AtomicU32::new(0));
    let slow = Arc::new(AtomicU32::new(0));

    let f = Arc::clone(&fast);
    let fast_id = scheduler
        .schedule_periodic(
            "fast",
            Duration::from_secs(30),
            Duration::ZERO,
            job(move || {
                let f = Arc::clone(&f);
                async move {
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

    let s = Arc::clone(&slow);
    let slow_id = scheduler
        .schedule_periodic(
            "slow",
            Duration::from_secs(3600),
            Duration::from_secs(5),
            job(move || {
                let s = Arc::clone(&s);
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(125)).await;

    // t = 0, 30, 60, 90, 120
    assert_eq!(fast.load(Ordering::SeqCst), 5);
    // t = 5
    assert_eq!(slow.load(Ordering::SeqCst), 1);

    let tasks = scheduler.all_tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[&fast_id].run_count, 5);
    assert_eq!(tasks[&slow_id].run_count, 1);

    scheduler.shutdown();
    for info in scheduler.all_tasks().values() {
        assert_eq!(info.status, TaskStatus::Cancelled);
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_timer() {
    let scheduler = Scheduler::new();
    let counter = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&counter);
    scheduler
        .schedule_periodic(
            "tick",
            Duration::from_secs(1),
            Duration::ZERO,
            job(move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();
    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.shutdown();

    let seen = counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(counter.load(Ordering::SeqCst), seen);
    assert!(scheduler.start().is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Guard + clock
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn guard_protects_sweep_shared_across_tasks() {
    let flag = Arc::new(InFlight::new());
    let held = flag.try_enter_owned().unwrap();

    let f = Arc::clone(&flag);
    let refused = tokio::spawn(async move { f.try_enter_owned().is_none() })
        .await
        .unwrap();
    assert!(refused);

    drop(held);
    assert!(flag.try_enter().is_some());
}

#[test]
fn manual_clock_shared_as_trait_object() {
    let start = chrono::Utc::now();
    let manual = Arc::new(ManualClock::new(start));
    let clock: Arc<dyn Clock> = manual.clone();

    manual.advance(chrono::Duration::hours(25));
    assert_eq!(clock.now() - start, chrono::Duration::hours(25));
}
