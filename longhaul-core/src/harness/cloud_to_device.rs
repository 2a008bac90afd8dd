//! Cloud-to-device longhaul orchestrator.
//!
//! Sends messages from the service side at a fixed cadence; arrivals are
//! recorded by the device client's message handler, wired when the device
//! client was attached to the run resources.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;

use super::{LonghaulResources, RunState};
use crate::correlation::CorrelationEnvelope;
use crate::schedule::{PollOutcome, run_on_loop, wait_for};
use crate::stats::{DeliveryCategory, StatisticsStore};
use crate::transport::ServiceClient;
use crate::{LonghaulError, Result};

/// Orchestrates one cloud-to-device longhaul run.
pub struct CloudToDeviceTest {
    resources: Arc<LonghaulResources>,
    state: Mutex<RunState>,
}

impl CloudToDeviceTest {
    pub fn new(resources: Arc<LonghaulResources>) -> Self {
        Self {
            resources,
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Current orchestrator stage.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        tracing::debug!("Cloud-to-device test entering {state:?}");
        *self.state.lock() = state;
    }

    /// Runs the cloud-to-device production loop for `total`, one message per
    /// `iteration` slot, then applies the delivery verdict.
    ///
    /// # Errors
    ///
    /// - `LonghaulError::Configuration` - Device or service client missing
    /// - `LonghaulError::Timeout` - Service messenger never finished opening
    /// - `LonghaulError::Environment` - Id generation or envelope encoding broke
    /// - `LonghaulError::Verdict` - Deliveries were lost or too slow
    pub async fn run(&self, iteration: Duration, total: Duration) -> Result<()> {
        let resources = &self.resources;
        if resources.device_client().is_none() {
            return Err(LonghaulError::Configuration {
                reason: "device client not attached".to_string(),
            });
        }
        let service = resources
            .service_client()
            .ok_or_else(|| LonghaulError::Configuration {
                reason: "service client not attached".to_string(),
            })?;

        let stats = resources.statistics();
        let timing = &resources.config().timing;

        service.open()?;
        let open_poll_service = Arc::clone(&service);
        wait_for(
            "service messenger open",
            move || {
                if open_poll_service.is_open() {
                    PollOutcome::Ready
                } else {
                    PollOutcome::Pending
                }
            },
            timing.service_open_timeout,
            timing.poll_interval,
        )
        .await?;
        self.set_state(RunState::Ready);

        self.set_state(RunState::Running);
        let producer_resources = Arc::clone(resources);
        let producer_service = Arc::clone(&service);
        let producer_stats = Arc::clone(&stats);
        let loop_result = run_on_loop(
            move || {
                let resources = Arc::clone(&producer_resources);
                let service = Arc::clone(&producer_service);
                let stats = Arc::clone(&producer_stats);
                async move { send_one(&resources, &service, &stats) }
            },
            iteration,
            total,
        )
        .await;

        // Extra time for the last messages.
        self.set_state(RunState::Draining);
        tokio::time::sleep(iteration * timing.drain_cycles).await;

        tracing::info!("Longhaul cloud-to-device stats: {}", stats.to_json());

        let outcome = match loop_result {
            Err(e) => Err(e),
            Ok(()) => {
                let summary = stats.summary(DeliveryCategory::CloudToDevice);
                tracing::info!("Summary: {summary}");
                summary.verdict(resources.config().delivery.max_c2d_travel_time)
            }
        };
        self.set_state(RunState::Stopped);

        outcome
    }
}

/// One production-loop iteration: queue a cloud-to-device message and record
/// it. A rejected send is a recorded transient fault, not a loop failure.
fn send_one(
    resources: &LonghaulResources,
    service: &Arc<dyn ServiceClient>,
    stats: &Arc<StatisticsStore>,
) -> Result<()> {
    let operation_id = resources.next_operation_id();
    if !operation_id.is_valid() {
        return Err(LonghaulError::Environment {
            reason: "failed generating cloud-to-device operation id".to_string(),
        });
    }

    let payload = CorrelationEnvelope::new(resources.test_run_id(), operation_id)
        .encode()
        .map_err(|e| LonghaulError::Environment {
            reason: format!("failed encoding cloud-to-device envelope: {e}"),
        })?;

    let queued_at = Local::now();
    let completion_stats = Arc::clone(stats);
    let send_result = service.send_cloud_to_device(
        resources.device_id(),
        payload,
        Box::new(move |outcome| {
            completion_stats.record_sent(
                DeliveryCategory::CloudToDevice,
                operation_id,
                outcome,
                Local::now(),
            );
        }),
    );

    if let Err(e) = &send_result {
        tracing::error!("Failed sending cloud-to-device message {operation_id}: {e}");
    }
    stats.record_queued(
        DeliveryCategory::CloudToDevice,
        operation_id,
        send_result.is_ok(),
        queued_at,
    );

    Ok(())
}
