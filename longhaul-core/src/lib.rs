//! Longhaul Core - Delivery verification engine
//!
//! This crate provides the building blocks for extended-duration delivery
//! reliability runs: operation/correlation identifiers, the concurrent
//! statistics store, time-bounded scheduling primitives, and the per-category
//! test orchestrators that reduce a stream of timestamped events into a
//! pass/fail verdict.

pub mod config;
pub mod correlation;
pub mod harness;
pub mod schedule;
pub mod stats;
pub mod tracing_setup;
pub mod transport;

// Re-export main types for convenient access
pub use config::LonghaulConfig;
pub use correlation::{CorrelationEnvelope, OperationId, OperationIdGenerator};
pub use harness::{
    CloudToDeviceTest, DeviceMethodTest, LonghaulResources, RunState, TelemetryTest,
};
pub use stats::{DeliveryCategory, DeliverySummary, StatisticsStore};
pub use transport::{DeviceClient, LoopbackHub, ServiceClient, TelemetryListener, TransportError};

/// Errors that can bubble up from any Longhaul subsystem.
///
/// Only `Configuration`, `Environment` and `Timeout` abort a run before the
/// verdict; transient per-operation faults are tallied in the statistics
/// store instead and surface, if at all, as a `Verdict` failure.
#[derive(Debug, thiserror::Error)]
pub enum LonghaulError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Environment fault: {reason}")]
    Environment { reason: String },

    #[error("Timed out after {timeout_secs}s waiting for {operation}")]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Delivery verdict failed: {reason}")]
    Verdict { reason: String },
}

impl LonghaulError {
    /// Returns true when the error aborts a run before the verdict step.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LonghaulError::Configuration { .. }
                | LonghaulError::Environment { .. }
                | LonghaulError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LonghaulError>;
