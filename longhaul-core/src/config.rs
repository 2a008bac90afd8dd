//! Centralized configuration for Longhaul.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

/// Central configuration for all Longhaul components.
///
/// Groups related configuration settings into logical sections.
#[derive(Debug, Clone, Default)]
pub struct LonghaulConfig {
    pub delivery: DeliveryConfig,
    pub timing: TimingConfig,
    pub loopback: LoopbackConfig,
}

/// Delivery verification thresholds and identifiers.
///
/// Controls the pass/fail bounds applied to each delivery category and the
/// name under which remote method invocations are issued.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Maximum accepted telemetry travel time
    pub max_telemetry_travel_time: Duration,
    /// Maximum accepted cloud-to-device travel time
    pub max_c2d_travel_time: Duration,
    /// Maximum accepted device method round-trip; also the invoke timeout
    pub max_method_travel_time: Duration,
    /// Method name used for every remote invocation
    pub method_name: &'static str,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_telemetry_travel_time: Duration::from_secs(300),
            max_c2d_travel_time: Duration::from_secs(300),
            max_method_travel_time: Duration::from_secs(300),
            method_name: "longhaulDeviceMethod",
        }
    }
}

/// Scheduling and wait-primitive configuration.
///
/// Controls the condition-polling interval, the drain window applied after
/// a production loop ends, and setup timeouts.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Sleep between predicate polls in `wait_for`
    pub poll_interval: Duration,
    /// Iteration multiples slept after the loop so in-flight deliveries land
    pub drain_cycles: u32,
    /// Maximum wait for the service messenger to finish opening
    pub service_open_timeout: Duration,
    /// Offset applied to the listener's event window start
    pub listen_window_delta: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            drain_cycles: 10,
            service_open_timeout: Duration::from_secs(60),
            listen_window_delta: Duration::from_secs(60),
        }
    }
}

/// Loopback transport configuration for tests and local runs.
///
/// Controls the simulated delivery latency and failure injection used when
/// no real backend is attached.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Simulated one-way delivery latency
    pub delivery_latency: Duration,
    /// Fraction of send attempts that fail at completion (0.0 to 1.0)
    pub failure_rate: f64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            delivery_latency: Duration::from_millis(20),
            failure_rate: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = LonghaulConfig::default();
        assert_eq!(
            config.delivery.max_telemetry_travel_time,
            Duration::from_secs(300)
        );
        assert_eq!(config.delivery.max_c2d_travel_time, Duration::from_secs(300));
        assert_eq!(
            config.delivery.max_method_travel_time,
            Duration::from_secs(300)
        );
        assert_eq!(config.delivery.method_name, "longhaulDeviceMethod");
    }

    #[test]
    fn test_default_timing() {
        let timing = TimingConfig::default();
        assert_eq!(timing.poll_interval, Duration::from_millis(100));
        assert_eq!(timing.drain_cycles, 10);
    }

    #[test]
    fn test_loopback_defaults_are_reliable() {
        let loopback = LoopbackConfig::default();
        assert_eq!(loopback.failure_rate, 0.0);
        assert!(loopback.delivery_latency < Duration::from_secs(1));
    }
}
