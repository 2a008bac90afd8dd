//! CLI command implementations

use std::sync::Arc;
use std::time::Duration;

use clap::{Subcommand, ValueEnum};
use longhaul_core::config::{LonghaulConfig, LoopbackConfig};
use longhaul_core::harness::{CloudToDeviceTest, DeviceMethodTest, TelemetryTest};
use longhaul_core::transport::LoopbackHub;
use longhaul_core::{LonghaulResources, Result};

/// Delivery category exercised by a run.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RunCategory {
    /// Device-to-cloud telemetry messages
    Telemetry,
    /// Cloud-to-device messages
    CloudToDevice,
    /// Remote method invocations
    DeviceMethod,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one delivery category against the loopback transport
    Run {
        /// Delivery category to exercise
        #[arg(value_enum)]
        category: RunCategory,
        /// Target seconds between operations
        #[arg(short, long, default_value = "1")]
        iteration_seconds: u64,
        /// Total run duration in seconds
        #[arg(short, long, default_value = "60")]
        total_seconds: u64,
        /// Device identity the run produces against
        #[arg(long, default_value = "longhaul-device")]
        device_id: String,
        /// Simulated one-way delivery latency in milliseconds
        #[arg(long, default_value = "20")]
        latency_ms: u64,
        /// Fraction of sends that fail at completion (0.0 to 1.0)
        #[arg(long, default_value = "0.0")]
        failure_rate: f64,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            category,
            iteration_seconds,
            total_seconds,
            device_id,
            latency_ms,
            failure_rate,
        } => {
            run_category(
                category,
                Duration::from_secs(iteration_seconds),
                Duration::from_secs(total_seconds),
                device_id,
                Duration::from_millis(latency_ms),
                failure_rate,
            )
            .await
        }
    }
}

/// Run one delivery category end to end over the loopback transport
///
/// # Errors
/// - `LonghaulError::Configuration` - Required transport handle missing
/// - `LonghaulError::Verdict` - Deliveries were lost or too slow
async fn run_category(
    category: RunCategory,
    iteration: Duration,
    total: Duration,
    device_id: String,
    delivery_latency: Duration,
    failure_rate: f64,
) -> Result<()> {
    let config = LonghaulConfig {
        loopback: LoopbackConfig {
            delivery_latency,
            failure_rate,
        },
        ..Default::default()
    };

    let hub = LoopbackHub::new(config.loopback.clone());
    let resources = Arc::new(LonghaulResources::new(config, device_id));
    resources.attach_device_client(hub.device_client());
    resources.attach_service_client(hub.service_client());
    resources.attach_listener(hub.listener());

    println!(
        "Starting {category:?} run: one operation per {}s for {}s (test_run_id={})",
        iteration.as_secs(),
        total.as_secs(),
        resources.test_run_id()
    );

    match category {
        RunCategory::Telemetry => {
            TelemetryTest::new(Arc::clone(&resources))
                .run(iteration, total)
                .await?;
        }
        RunCategory::CloudToDevice => {
            CloudToDeviceTest::new(Arc::clone(&resources))
                .run(iteration, total)
                .await?;
        }
        RunCategory::DeviceMethod => {
            DeviceMethodTest::new(Arc::clone(&resources))
                .run(iteration, total)
                .await?;
        }
    }

    println!("{category:?} run passed");
    Ok(())
}
