//! Telemetry longhaul orchestrator.
//!
//! Produces telemetry messages at a fixed cadence, listens for their arrival
//! at the backend, and verifies that every confirmed send was observed
//! within the travel-time threshold.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeDelta};
use parking_lot::Mutex;

use super::{LonghaulResources, RunState};
use crate::correlation::{CorrelationEnvelope, match_inbound};
use crate::schedule::run_on_loop;
use crate::stats::{DeliveryCategory, StatisticsStore};
use crate::transport::DeviceClient;
use crate::{LonghaulError, Result};

/// Orchestrates one telemetry longhaul run.
pub struct TelemetryTest {
    resources: Arc<LonghaulResources>,
    state: Mutex<RunState>,
}

impl TelemetryTest {
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
        tracing::debug!("Telemetry test entering {state:?}");
        *self.state.lock() = state;
    }

    /// Runs the telemetry production loop for `total`, one message per
    /// `iteration` slot, then applies the delivery verdict.
    ///
    /// # Errors
    ///
    /// - `LonghaulError::Configuration` - Device client or listener missing
    /// - `LonghaulError::Transport` - Listener could not be started
    /// - `LonghaulError::Environment` - Id generation or envelope encoding broke
    /// - `LonghaulError::Verdict` - Deliveries were lost or too slow
    pub async fn run(&self, iteration: Duration, total: Duration) -> Result<()> {
        let resources = &self.resources;
        let device = resources
            .device_client()
            .ok_or_else(|| LonghaulError::Configuration {
                reason: "device client not attached".to_string(),
            })?;
        let listener = resources
            .listener()
            .ok_or_else(|| LonghaulError::Configuration {
                reason: "telemetry listener not attached".to_string(),
            })?;

        let stats = resources.statistics();
        let timing = &resources.config().timing;

        // Listen from slightly outside the run window so no early arrival
        // falls off the filter edge.
        let window_delta =
            TimeDelta::from_std(timing.listen_window_delta).unwrap_or_else(|_| TimeDelta::zero());
        let arrival_stats = Arc::clone(&stats);
        let run_id = resources.test_run_id().to_string();
        listener.start(
            Local::now() - window_delta,
            Arc::new(move |data: &[u8]| {
                if let Some(operation_id) = match_inbound(data, &run_id) {
                    arrival_stats.record_received(
                        DeliveryCategory::Telemetry,
                        operation_id,
                        Local::now(),
                    );
                }
            }),
        )?;
        self.set_state(RunState::Ready);

        self.set_state(RunState::Running);
        let producer_resources = Arc::clone(resources);
        let producer_device = Arc::clone(&device);
        let producer_stats = Arc::clone(&stats);
        let loop_result = run_on_loop(
            move || {
                let resources = Arc::clone(&producer_resources);
                let device = Arc::clone(&producer_device);
                let stats = Arc::clone(&producer_stats);
                async move { send_one(&resources, &device, &stats) }
            },
            iteration,
            total,
        )
        .await;

        // Extra time for the last messages.
        self.set_state(RunState::Draining);
        tokio::time::sleep(iteration * timing.drain_cycles).await;

        tracing::info!("Longhaul telemetry stats: {}", stats.to_json());

        let outcome = match loop_result {
            Err(e) => Err(e),
            Ok(()) => {
                let summary = stats.summary(DeliveryCategory::Telemetry);
                tracing::info!("Summary: {summary}");
                summary.verdict(resources.config().delivery.max_telemetry_travel_time)
            }
        };

        if let Err(e) = listener.stop() {
            tracing::error!("Failed stopping telemetry listener: {e}");
        }
        self.set_state(RunState::Stopped);

        outcome
    }
}

/// One production-loop iteration: queue a telemetry message and record it.
///
/// A rejected send is recorded as a transient fault and does not fail the
/// iteration; only id generation or envelope encoding failures abort the
/// loop.
fn send_one(
    resources: &LonghaulResources,
    device: &Arc<dyn DeviceClient>,
    stats: &Arc<StatisticsStore>,
) -> Result<()> {
    let operation_id = resources.next_operation_id();
    if !operation_id.is_valid() {
        return Err(LonghaulError::Environment {
            reason: "failed generating telemetry operation id".to_string(),
        });
    }

    let payload = CorrelationEnvelope::new(resources.test_run_id(), operation_id)
        .encode()
        .map_err(|e| LonghaulError::Environment {
            reason: format!("failed encoding telemetry envelope: {e}"),
        })?;

    let queued_at = Local::now();
    let completion_stats = Arc::clone(stats);
    let send_result = device.send_telemetry(
        payload,
        Box::new(move |outcome| {
            completion_stats.record_sent(
                DeliveryCategory::Telemetry,
                operation_id,
                outcome,
                Local::now(),
            );
        }),
    );

    if let Err(e) = &send_result {
        tracing::error!("Failed sending telemetry message {operation_id}: {e}");
    }
    stats.record_queued(
        DeliveryCategory::Telemetry,
        operation_id,
        send_result.is_ok(),
        queued_at,
    );

    Ok(())
}
