//! In-memory loopback transport for tests and local runs.
//!
//! Wires the device client, service client and telemetry listener roles
//! together through one shared hub: telemetry sent by the device surfaces at
//! the listener, cloud-to-device messages and method invocations sent by the
//! service surface at the device handlers. Completion and arrival callbacks
//! fire on spawned tasks after a configurable latency, reproducing the
//! concurrency shape of a real backend, and a failure rate can be injected
//! to exercise the transient-fault accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;

use super::{
    CompletionCallback, ConnectionHandler, ConnectionStatus, ConnectionStatusReason, DeviceClient,
    Disposition, EventCallback, MessageHandler, MethodHandler, MethodResponse, SendOutcome,
    ServiceClient, TelemetryListener, TransportError,
};
use crate::config::LoopbackConfig;

struct HubInner {
    config: LoopbackConfig,
    message_handler: Mutex<Option<MessageHandler>>,
    method_handler: Mutex<Option<MethodHandler>>,
    connection_handler: Mutex<Option<ConnectionHandler>>,
    event_callback: Mutex<Option<EventCallback>>,
    listening: AtomicBool,
    service_open: AtomicBool,
}

impl HubInner {
    fn inject_failure(&self) -> bool {
        self.config.failure_rate > 0.0 && rand::random::<f64>() < self.config.failure_rate
    }
}

/// Shared in-memory backend handing out the three transport roles.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                message_handler: Mutex::new(None),
                method_handler: Mutex::new(None),
                connection_handler: Mutex::new(None),
                event_callback: Mutex::new(None),
                listening: AtomicBool::new(false),
                service_open: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the device-side client role.
    pub fn device_client(&self) -> Arc<dyn DeviceClient> {
        Arc::new(LoopbackDeviceClient {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Returns the service-side client role.
    pub fn service_client(&self) -> Arc<dyn ServiceClient> {
        Arc::new(LoopbackServiceClient {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Returns the telemetry listener role.
    pub fn listener(&self) -> Arc<dyn TelemetryListener> {
        Arc::new(LoopbackListener {
            inner: Arc::clone(&self.inner),
        })
    }
}

struct LoopbackDeviceClient {
    inner: Arc<HubInner>,
}

impl DeviceClient for LoopbackDeviceClient {
    fn send_telemetry(
        &self,
        payload: String,
        on_complete: CompletionCallback,
    ) -> Result<(), TransportError> {
        let inner = Arc::clone(&self.inner);
        let failed = inner.inject_failure();

        tokio::spawn(async move {
            tokio::time::sleep(inner.config.delivery_latency).await;

            if failed {
                on_complete(SendOutcome::Error);
                return;
            }
            on_complete(SendOutcome::Ok);

            let callback = inner.event_callback.lock().clone();
            if let Some(callback) = callback {
                callback(payload.as_bytes());
            }
        });

        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.inner.message_handler.lock() = Some(handler);
    }

    fn set_method_handler(&self, handler: MethodHandler) {
        *self.inner.method_handler.lock() = Some(handler);
    }

    fn set_connection_handler(&self, handler: ConnectionHandler) {
        *self.inner.connection_handler.lock() = Some(handler.clone());

        // The loopback "connects" as soon as a handler is watching.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.delivery_latency).await;
            handler(ConnectionStatus::Connected, ConnectionStatusReason::Ok);
        });
    }
}

struct LoopbackServiceClient {
    inner: Arc<HubInner>,
}

#[async_trait]
impl ServiceClient for LoopbackServiceClient {
    fn open(&self) -> Result<(), TransportError> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.delivery_latency).await;
            inner.service_open.store(true, Ordering::SeqCst);
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.service_open.load(Ordering::SeqCst)
    }

    fn send_cloud_to_device(
        &self,
        _device_id: &str,
        payload: String,
        on_complete: CompletionCallback,
    ) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let inner = Arc::clone(&self.inner);
        let failed = inner.inject_failure();

        tokio::spawn(async move {
            tokio::time::sleep(inner.config.delivery_latency).await;

            if failed {
                on_complete(SendOutcome::Error);
                return;
            }
            on_complete(SendOutcome::Ok);

            let handler = inner.message_handler.lock().clone();
            if let Some(handler) = handler {
                if handler(payload.as_bytes()) == Disposition::Abandoned {
                    tracing::debug!("Loopback c2d message abandoned by device");
                }
            }
        });

        Ok(())
    }

    async fn invoke_method(
        &self,
        _device_id: &str,
        method_name: &str,
        payload: String,
        timeout: Duration,
    ) -> Result<MethodResponse, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if self.inner.inject_failure() {
            return Err(TransportError::InvokeFailed {
                reason: "injected failure".to_string(),
            });
        }

        let inner = Arc::clone(&self.inner);
        let method_name = method_name.to_string();

        let invocation = async move {
            tokio::time::sleep(inner.config.delivery_latency).await;

            let handler = inner.method_handler.lock().clone();
            match handler {
                Some(handler) => Ok(handler(&method_name, payload.as_bytes())),
                None => Err(TransportError::InvokeFailed {
                    reason: "no method handler installed".to_string(),
                }),
            }
        };

        tokio::time::timeout(timeout, invocation)
            .await
            .map_err(|_| TransportError::InvokeTimeout(timeout))?
    }
}

struct LoopbackListener {
    inner: Arc<HubInner>,
}

impl TelemetryListener for LoopbackListener {
    fn start(
        &self,
        _start_from: DateTime<Local>,
        on_event: EventCallback,
    ) -> Result<(), TransportError> {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyListening);
        }
        *self.inner.event_callback.lock() = Some(on_event);
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        if !self.inner.listening.swap(false, Ordering::SeqCst) {
            return Err(TransportError::NotListening);
        }
        // Stop is a no-op listen request: clear the callback, release the slot.
        *self.inner.event_callback.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    fn fast_config() -> LoopbackConfig {
        LoopbackConfig {
            delivery_latency: Duration::from_millis(5),
            failure_rate: 0.0,
        }
    }

    #[tokio::test]
    async fn test_telemetry_reaches_listener_and_completion_fires() {
        let hub = LoopbackHub::new(fast_config());
        let device = hub.device_client();
        let listener = hub.listener();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        listener
            .start(
                Local::now(),
                Arc::new(move |data: &[u8]| {
                    sink.lock().push(data.to_vec());
                }),
            )
            .unwrap();

        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);
        device
            .send_telemetry(
                "hello".to_string(),
                Box::new(move |outcome| {
                    assert!(outcome.is_ok());
                    flag.store(true, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(received.lock().as_slice(), &[b"hello".to_vec()]);

        listener.stop().unwrap();
    }

    #[tokio::test]
    async fn test_listener_rejects_double_start_and_stray_stop() {
        let hub = LoopbackHub::new(fast_config());
        let listener = hub.listener();

        assert!(matches!(
            listener.stop(),
            Err(TransportError::NotListening)
        ));

        listener.start(Local::now(), Arc::new(|_: &[u8]| {})).unwrap();
        assert!(matches!(
            listener.start(Local::now(), Arc::new(|_: &[u8]| {})),
            Err(TransportError::AlreadyListening)
        ));
    }

    #[tokio::test]
    async fn test_c2d_requires_open_service() {
        let hub = LoopbackHub::new(fast_config());
        let service = hub.service_client();

        let result =
            service.send_cloud_to_device("device-1", "payload".to_string(), Box::new(|_| {}));
        assert!(matches!(result, Err(TransportError::NotOpen)));

        service.open().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.is_open());

        service
            .send_cloud_to_device("device-1", "payload".to_string(), Box::new(|_| {}))
            .unwrap();
    }

    #[tokio::test]
    async fn test_method_invocation_round_trip() {
        let hub = LoopbackHub::new(fast_config());
        let device = hub.device_client();
        let service = hub.service_client();

        device.set_method_handler(Arc::new(|name: &str, payload: &[u8]| {
            assert_eq!(name, "echo");
            MethodResponse {
                status: 200,
                payload: payload.to_vec(),
            }
        }));

        service.open().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = service
            .invoke_method("device-1", "echo", "ping".to_string(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.payload, b"ping");
    }

    #[tokio::test]
    async fn test_method_invocation_times_out() {
        let hub = LoopbackHub::new(LoopbackConfig {
            delivery_latency: Duration::from_millis(200),
            failure_rate: 0.0,
        });
        let service = hub.service_client();

        service.open().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let result = service
            .invoke_method(
                "device-1",
                "echo",
                "ping".to_string(),
                Duration::from_millis(20),
            )
            .await;

        assert!(matches!(result, Err(TransportError::InvokeTimeout(_))));
    }

    #[tokio::test]
    async fn test_injected_failures_report_error_outcome() {
        let hub = LoopbackHub::new(LoopbackConfig {
            delivery_latency: Duration::from_millis(5),
            failure_rate: 1.0,
        });
        let device = hub.device_client();

        let failures = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&failures);
        device
            .send_telemetry(
                "doomed".to_string(),
                Box::new(move |outcome| {
                    assert!(!outcome.is_ok());
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }
}
