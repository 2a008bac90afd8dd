//! Time-bounded scheduling primitives for longhaul runs.
//!
//! Two cooperative building blocks: a fixed-cadence repeating-action loop
//! bounded by a total duration, and a condition-polling waiter bounded by a
//! timeout. Both check elapsed time only at iteration/poll boundaries, so
//! cancellation is coarse-grained and the effective run bound is
//! `total + iteration + one action latency`.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::{LonghaulError, Result};

/// Outcome of one `wait_for` predicate poll.
pub enum PollOutcome {
    /// Condition satisfied; stop waiting successfully.
    Ready,
    /// Condition can never be satisfied; stop waiting with this error.
    Failed(LonghaulError),
    /// Not there yet; poll again until the timeout.
    Pending,
}

/// Repeatedly invokes `action` at a target cadence until `total` elapses.
///
/// After each invocation the remainder of the iteration slot is slept off,
/// enforcing the cadence rather than running as fast as possible. The action
/// is awaited synchronously with respect to the loop; it may kick off
/// asynchronous work but must return promptly so the cadence is honored.
///
/// Elapsed time is measured right after each invocation, so the loop exits
/// within one iteration slot plus one action latency past `total`.
///
/// # Errors
///
/// Stops immediately with the action's error if any invocation fails.
pub async fn run_on_loop<A, Fut>(mut action: A, iteration: Duration, total: Duration) -> Result<()>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();

    loop {
        let iteration_start = Instant::now();

        action().await?;

        // Measured before the cadence sleep; precise enough since the
        // iteration slot is far smaller than the total duration.
        if start.elapsed() >= total {
            break;
        }

        let spent = iteration_start.elapsed();
        if spent < iteration {
            tokio::time::sleep(iteration - spent).await;
        }
    }

    Ok(())
}

/// Polls `predicate` until it resolves or `timeout` elapses.
///
/// `Ready` returns success immediately, `Failed` returns its error
/// immediately, and `Pending` sleeps `poll_interval` before the next poll.
/// Used wherever the engine must block on an external asynchronous condition
/// without a native blocking primitive.
///
/// # Errors
///
/// - `LonghaulError::Timeout` - Predicate stayed `Pending` past `timeout`
/// - The `Failed` payload, verbatim
pub async fn wait_for<P>(
    operation: &str,
    mut predicate: P,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()>
where
    P: FnMut() -> PollOutcome,
{
    let start = Instant::now();

    loop {
        match predicate() {
            PollOutcome::Ready => return Ok(()),
            PollOutcome::Failed(error) => {
                tracing::error!("Wait for {operation} failed: {error}");
                return Err(error);
            }
            PollOutcome::Pending => {
                if start.elapsed() >= timeout {
                    tracing::error!("Wait for {operation} timed out");
                    return Err(LonghaulError::Timeout {
                        operation: operation.to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_loop_honors_cadence_and_total_bound() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);

        let iteration = Duration::from_millis(50);
        let total = Duration::from_millis(220);
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

        // At least floor(total / iteration) invocations for an immediate action
        assert!(count.load(Ordering::SeqCst) >= 4);
        // Terminates within total + iteration (plus scheduling slack)
        assert!(start.elapsed() < total + iteration + Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_loop_stops_on_action_failure() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);

        let result = run_on_loop(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LonghaulError::Environment {
                        reason: "clock read failed".to_string(),
                    })
                }
            },
            Duration::from_millis(10),
            Duration::from_secs(60),
        )
        .await;

        assert!(matches!(result, Err(LonghaulError::Environment { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loop_runs_slow_action_at_least_once() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);

        // Action latency exceeds the total duration; the loop still runs it
        // once and then exits at the first boundary check.
        run_on_loop(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok(())
                }
            },
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_ready_returns_immediately() {
        let start = Instant::now();
        wait_for(
            "already ready",
            || PollOutcome::Ready,
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wait_for_surfaces_predicate_failure() {
        let result = wait_for(
            "doomed condition",
            || {
                PollOutcome::Failed(LonghaulError::Configuration {
                    reason: "messenger rejected open".to_string(),
                })
            },
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(LonghaulError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_wait_for_times_out_near_deadline() {
        let start = Instant::now();
        let result = wait_for(
            "never ready",
            || PollOutcome::Pending,
            Duration::from_millis(300),
            Duration::from_millis(50),
        )
        .await;

        let elapsed = start.elapsed();
        assert!(matches!(result, Err(LonghaulError::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(300));
        // Roughly 1x-1.2x the deadline, one poll interval of slack
        assert!(elapsed < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_wait_for_eventually_ready() {
        let polls = Arc::new(AtomicU32::new(0));
        let poll_counter = Arc::clone(&polls);

        wait_for(
            "third poll succeeds",
            move || {
                if poll_counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                    PollOutcome::Ready
                } else {
                    PollOutcome::Pending
                }
            },
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }
}
