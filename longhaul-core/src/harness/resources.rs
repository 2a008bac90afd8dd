//! Shared resources owned by one longhaul run.

use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::LonghaulConfig;
use crate::correlation::{OperationId, OperationIdGenerator, match_inbound};
use crate::stats::{DeliveryCategory, StatisticsStore};
use crate::transport::{
    DeviceClient, Disposition, MethodResponse, ServiceClient, TelemetryListener,
};

/// Method response status for a handled invocation.
const METHOD_STATUS_OK: i32 = 200;
/// Method response status for an envelope that is not ours.
const METHOD_STATUS_REJECTED: i32 = 400;
/// Method response status for an unexpected method name.
const METHOD_STATUS_UNKNOWN_METHOD: i32 = 404;

/// Everything one longhaul run owns: its identity, its id counter, its
/// statistics store, and the attached transport handles.
///
/// Exactly one instance is active per process at a time; the counter and
/// store are exclusively owned by it and passed to orchestrators by
/// reference, never through process-wide globals. Attaching the device
/// client wires its inbound callbacks (cloud-to-device messages, method
/// invocations, connection status) straight into the store.
pub struct LonghaulResources {
    test_run_id: String,
    device_id: String,
    config: LonghaulConfig,
    ids: OperationIdGenerator,
    stats: Arc<StatisticsStore>,
    device: Mutex<Option<Arc<dyn DeviceClient>>>,
    service: Mutex<Option<Arc<dyn ServiceClient>>>,
    listener: Mutex<Option<Arc<dyn TelemetryListener>>>,
}

impl LonghaulResources {
    /// Creates the resources for a fresh run with a generated run id.
    pub fn new(config: LonghaulConfig, device_id: impl Into<String>) -> Self {
        let test_run_id = Uuid::new_v4().to_string();
        tracing::info!("Longhaul run initialized (test_run_id={test_run_id})");

        Self {
            test_run_id,
            device_id: device_id.into(),
            config,
            ids: OperationIdGenerator::new(),
            stats: Arc::new(StatisticsStore::new()),
            device: Mutex::new(None),
            service: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// The generated id isolating this run's traffic from concurrent runs.
    pub fn test_run_id(&self) -> &str {
        &self.test_run_id
    }

    /// The device this run produces against.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &LonghaulConfig {
        &self.config
    }

    /// Read-only pass-through to the run's statistics store.
    pub fn statistics(&self) -> Arc<StatisticsStore> {
        Arc::clone(&self.stats)
    }

    /// Next per-run operation id; `OperationId::INVALID` on counter failure.
    pub fn next_operation_id(&self) -> OperationId {
        self.ids.next_id()
    }

    /// Read-only pass-through to the attached device client, if any.
    pub fn device_client(&self) -> Option<Arc<dyn DeviceClient>> {
        self.device.lock().clone()
    }

    pub fn service_client(&self) -> Option<Arc<dyn ServiceClient>> {
        self.service.lock().clone()
    }

    pub fn listener(&self) -> Option<Arc<dyn TelemetryListener>> {
        self.listener.lock().clone()
    }

    /// Attaches the device client and wires its inbound callbacks.
    ///
    /// The message handler records matching cloud-to-device arrivals; the
    /// method handler records matching invocations and echoes the payload
    /// back; the connection handler records status changes. Non-matching
    /// and unparseable inbound messages are acknowledged and dropped.
    pub fn attach_device_client(&self, client: Arc<dyn DeviceClient>) {
        let stats = Arc::clone(&self.stats);
        client.set_connection_handler(Arc::new(move |status, reason| {
            tracing::info!("Connection status changed: {status:?} ({reason:?})");
            stats.add_connection_status(status, reason);
        }));

        let stats = Arc::clone(&self.stats);
        let run_id = self.test_run_id.clone();
        client.set_message_handler(Arc::new(move |data| {
            if let Some(operation_id) = match_inbound(data, &run_id) {
                stats.record_received(DeliveryCategory::CloudToDevice, operation_id, Local::now());
            }
            Disposition::Accepted
        }));

        let stats = Arc::clone(&self.stats);
        let run_id = self.test_run_id.clone();
        let method_name = self.config.delivery.method_name;
        client.set_method_handler(Arc::new(move |name, payload| {
            if name != method_name {
                tracing::error!("Unexpected device method received ({name})");
                return MethodResponse {
                    status: METHOD_STATUS_UNKNOWN_METHOD,
                    payload: Vec::new(),
                };
            }

            match match_inbound(payload, &run_id) {
                Some(operation_id) => {
                    stats.record_received(DeliveryCategory::DeviceMethod, operation_id, Local::now());
                    MethodResponse {
                        status: METHOD_STATUS_OK,
                        payload: payload.to_vec(),
                    }
                }
                None => MethodResponse {
                    status: METHOD_STATUS_REJECTED,
                    payload: Vec::new(),
                },
            }
        }));

        *self.device.lock() = Some(client);
    }

    /// Attaches the service-side client used for cloud-to-device sends and
    /// method invocations.
    pub fn attach_service_client(&self, client: Arc<dyn ServiceClient>) {
        *self.service.lock() = Some(client);
    }

    /// Attaches the telemetry listener used by the telemetry orchestrator.
    pub fn attach_listener(&self, listener: Arc<dyn TelemetryListener>) {
        *self.listener.lock() = Some(listener);
    }
}

impl Drop for LonghaulResources {
    fn drop(&mut self) {
        tracing::debug!(
            "Longhaul run resources released (test_run_id={})",
            self.test_run_id
        );
    }
}
