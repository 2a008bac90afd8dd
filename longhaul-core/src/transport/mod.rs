//! Transport seam between the verification engine and the message backend.
//!
//! The engine never opens connections or moves bytes itself; it consumes the
//! backend through these narrow traits. Completion and arrival callbacks are
//! invoked by the transport on its own tasks, concurrently with the
//! production loop, so every callback target must be thread-safe.

pub mod loopback;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;

pub use loopback::LoopbackHub;

/// Result code reported by a send completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SendOutcome {
    /// Backend confirmed the message.
    Ok,
    /// Backend gave up waiting for confirmation.
    MessageTimeout,
    /// Client was torn down with the message still pending.
    ClientDestroyed,
    /// Backend reported a delivery error.
    Error,
}

impl SendOutcome {
    pub fn is_ok(self) -> bool {
        matches!(self, SendOutcome::Ok)
    }
}

/// Device-side disposition of an inbound message.
///
/// Non-matching and unparseable messages are still `Accepted`: they are
/// acknowledged and dropped rather than left for redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Abandoned,
}

/// Connection state reported by the device client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Why the connection state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatusReason {
    Ok,
    ExpiredCredential,
    RetryExpired,
    NoNetwork,
    CommunicationError,
}

/// Response returned by a remote method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: i32,
    pub payload: Vec<u8>,
}

/// One-shot callback carrying a send completion result.
pub type CompletionCallback = Box<dyn FnOnce(SendOutcome) + Send + 'static>;

/// Handler for inbound cloud-to-device messages.
pub type MessageHandler = Arc<dyn Fn(&[u8]) -> Disposition + Send + Sync + 'static>;

/// Handler for inbound method invocations; returns the method response.
pub type MethodHandler = Arc<dyn Fn(&str, &[u8]) -> MethodResponse + Send + Sync + 'static>;

/// Callback for telemetry events observed by the listener.
pub type EventCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Handler for connection status changes.
pub type ConnectionHandler =
    Arc<dyn Fn(ConnectionStatus, ConnectionStatusReason) + Send + Sync + 'static>;

/// Errors surfaced by transport implementations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send rejected: {reason}")]
    SendRejected { reason: String },

    #[error("Method invocation failed: {reason}")]
    InvokeFailed { reason: String },

    #[error("Method invocation timed out after {0:?}")]
    InvokeTimeout(Duration),

    #[error("Service client is not open")]
    NotOpen,

    #[error("Listener already started")]
    AlreadyListening,

    #[error("Listener not started")]
    NotListening,
}

/// Device-side client: telemetry egress plus inbound message, method and
/// connection-status callbacks.
///
/// `send_telemetry` is non-blocking; the result of the actual delivery is
/// reported later through the completion callback on a transport task.
pub trait DeviceClient: Send + Sync {
    /// Queues a telemetry message for delivery.
    ///
    /// # Errors
    /// - `TransportError::SendRejected` - Message could not be queued at all
    fn send_telemetry(
        &self,
        payload: String,
        on_complete: CompletionCallback,
    ) -> Result<(), TransportError>;

    /// Installs the handler invoked for every inbound cloud-to-device message.
    fn set_message_handler(&self, handler: MessageHandler);

    /// Installs the handler invoked for every inbound method invocation.
    fn set_method_handler(&self, handler: MethodHandler);

    /// Installs the handler invoked on connection status changes.
    fn set_connection_handler(&self, handler: ConnectionHandler);
}

/// Service-side client: cloud-to-device egress and method invocation.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Starts opening the messenger; completion is observable via `is_open`.
    ///
    /// # Errors
    /// - `TransportError::SendRejected` - Open could not be initiated
    fn open(&self) -> Result<(), TransportError>;

    /// Returns true once the messenger has finished opening.
    fn is_open(&self) -> bool;

    /// Queues a cloud-to-device message for the given device.
    ///
    /// # Errors
    /// - `TransportError::NotOpen` - `open` has not completed yet
    /// - `TransportError::SendRejected` - Message could not be queued
    fn send_cloud_to_device(
        &self,
        device_id: &str,
        payload: String,
        on_complete: CompletionCallback,
    ) -> Result<(), TransportError>;

    /// Invokes a method on the given device, blocking up to `timeout`.
    ///
    /// # Errors
    /// - `TransportError::NotOpen` - `open` has not completed yet
    /// - `TransportError::InvokeTimeout` - Device did not respond in time
    /// - `TransportError::InvokeFailed` - Device rejected the invocation
    async fn invoke_method(
        &self,
        device_id: &str,
        method_name: &str,
        payload: String,
        timeout: Duration,
    ) -> Result<MethodResponse, TransportError>;
}

/// Listener observing telemetry events as they arrive at the backend.
pub trait TelemetryListener: Send + Sync {
    /// Starts listening for events from `start_from` onward.
    ///
    /// # Errors
    /// - `TransportError::AlreadyListening` - A listener is already active
    fn start(
        &self,
        start_from: DateTime<Local>,
        on_event: EventCallback,
    ) -> Result<(), TransportError>;

    /// Stops listening and releases the listener resource.
    ///
    /// # Errors
    /// - `TransportError::NotListening` - `start` was never called
    fn stop(&self) -> Result<(), TransportError>;
}
