//! Per-category test orchestrators and the shared run resources.
//!
//! Each orchestrator wires a producer action into the scheduling loop and a
//! receiver callback into the statistics store, then reduces the recorded
//! events into a pass/fail verdict. All three share one `LonghaulResources`
//! instance owning the run id, the id generator and the store.

pub mod cloud_to_device;
pub mod device_method;
pub mod resources;
pub mod telemetry;

pub use cloud_to_device::CloudToDeviceTest;
pub use device_method::DeviceMethodTest;
pub use resources::LonghaulResources;
pub use telemetry::TelemetryTest;

/// Stages an orchestrator moves through during one run.
///
/// Setup failures leave the orchestrator `Idle`; a completed run always ends
/// `Stopped`, whether the verdict passed or not. Device methods skip
/// `Draining` since invocation is synchronous from the caller's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Ready,
    Running,
    Draining,
    Stopped,
}
