//! Device method longhaul orchestrator.
//!
//! Invokes a remote method on the device at a fixed cadence. Invocation is
//! synchronous from the caller's perspective, so there is no drain window:
//! by the time the loop ends every response has either arrived or failed.

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

/// Result code recorded when the invocation failed at the transport level.
const METHOD_RESULT_TRANSPORT_ERROR: i32 = -1;

/// Orchestrates one device method longhaul run.
pub struct DeviceMethodTest {
    resources: Arc<LonghaulResources>,
    state: Mutex<RunState>,
}

impl DeviceMethodTest {
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
        tracing::debug!("Device method test entering {state:?}");
        *self.state.lock() = state;
    }

    /// Runs the method invocation loop for `total`, one invocation per
    /// `iteration` slot, then applies the delivery verdict.
    ///
    /// # Errors
    ///
    /// - `LonghaulError::Configuration` - Device or service client missing
    /// - `LonghaulError::Timeout` - Service client never finished opening
    /// - `LonghaulError::Environment` - Id generation or envelope encoding broke
    /// - `LonghaulError::Verdict` - Invocations were lost or too slow
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
            "service method client open",
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
                async move { invoke_one(&resources, &service, &stats).await }
            },
            iteration,
            total,
        )
        .await;

        tracing::info!("Longhaul device method stats: {}", stats.to_json());

        let outcome = match loop_result {
            Err(e) => Err(e),
            Ok(()) => {
                let summary = stats.summary(DeliveryCategory::DeviceMethod);
                tracing::info!("Summary: {summary}");
                summary.verdict(resources.config().delivery.max_method_travel_time)
            }
        };
        self.set_state(RunState::Stopped);

        outcome
    }
}

/// One production-loop iteration: invoke the method and record the result.
///
/// The invocation timeout doubles as the travel-time threshold; a transport
/// failure is recorded with an error result code and the loop continues.
async fn invoke_one(
    resources: &LonghaulResources,
    service: &Arc<dyn ServiceClient>,
    stats: &Arc<StatisticsStore>,
) -> Result<()> {
    let operation_id = resources.next_operation_id();
    if !operation_id.is_valid() {
        return Err(LonghaulError::Environment {
            reason: "failed generating device method operation id".to_string(),
        });
    }

    let payload = CorrelationEnvelope::new(resources.test_run_id(), operation_id)
        .encode()
        .map_err(|e| LonghaulError::Environment {
            reason: format!("failed encoding device method envelope: {e}"),
        })?;

    let delivery = &resources.config().delivery;
    let invoked_at = Local::now();
    let result = service
        .invoke_method(
            resources.device_id(),
            delivery.method_name,
            payload,
            delivery.max_method_travel_time,
        )
        .await;

    let result_code = match &result {
        Ok(response) => response.status,
        Err(e) => {
            tracing::error!("Failed invoking device method {operation_id}: {e}");
            METHOD_RESULT_TRANSPORT_ERROR
        }
    };
    stats.record_invoked(operation_id, result_code, invoked_at);

    Ok(())
}
