//! Timing contracts of the scheduling primitives.
//!
//! Verifies the cadence lower bound and termination bound of the production
//! loop and the deadline behavior of the condition-polling waiter, at
//! compressed durations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use longhaul_core::schedule::{PollOutcome, run_on_loop, wait_for};
use parking_lot::Mutex;

#[tokio::test]
async fn test_cadence_lower_bound_and_termination() {
    // Scaled rendition of the iteration=2s/total=10s contract: an immediate
    // action runs at least floor(total/iteration) times and the loop ends
    // within total + iteration.
    let iteration = Duration::from_millis(100);
    let total = Duration::from_millis(500);

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let start = Instant::now();

    run_on_loop(
        move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
        iteration,
        total,
    )
    .await
    .unwrap();

    let elapsed = start.elapsed();
    // Nominally floor(total/iteration) + 1 = 6; leave slack for CI jitter
    assert!(invocations.load(Ordering::SeqCst) >= 4);
    assert!(elapsed >= total);
    assert!(elapsed < total + iteration + Duration::from_millis(300));
}

#[tokio::test]
async fn test_cadence_spaces_invocations_apart() {
    let timestamps: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&timestamps);

    run_on_loop(
        move || {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(Instant::now());
                Ok(())
            }
        },
        Duration::from_millis(80),
        Duration::from_millis(250),
    )
    .await
    .unwrap();

    let timestamps = timestamps.lock();
    for pair in timestamps.windows(2) {
        // The cadence is a floor, not a best effort: slots are never cut short.
        assert!(pair[1] - pair[0] >= Duration::from_millis(75));
    }
}

#[tokio::test]
async fn test_slow_action_defers_no_sleep() {
    // An action consuming its whole slot is rescheduled immediately.
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let start = Instant::now();

    run_on_loop(
        move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok(())
            }
        },
        Duration::from_millis(40),
        Duration::from_millis(200),
    )
    .await
    .unwrap();

    // Four 60ms actions pass the 200ms mark; no cadence sleep is inserted.
    assert!(invocations.load(Ordering::SeqCst) >= 3);
    assert!(start.elapsed() < Duration::from_millis(450));
}

#[test]
fn test_wait_for_deadline_with_block_on() {
    // The waiter's contract holds under a plain blocking executor too.
    let start = Instant::now();
    let result = tokio_test::block_on(wait_for(
        "condition that never holds",
        || PollOutcome::Pending,
        Duration::from_secs(1),
        Duration::from_millis(100),
    ));

    let elapsed = start.elapsed();
    assert!(result.is_err());
    // Roughly 1x-1.2x the one second deadline
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1400));
}

#[tokio::test]
async fn test_wait_for_resolves_when_condition_flips() {
    let ready_after = Instant::now() + Duration::from_millis(150);

    wait_for(
        "condition flips shortly",
        move || {
            if Instant::now() >= ready_after {
                PollOutcome::Ready
            } else {
                PollOutcome::Pending
            }
        },
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .await
    .unwrap();
}
