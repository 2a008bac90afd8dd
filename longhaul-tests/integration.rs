//! Integration tests for Longhaul
//!
//! These tests verify the integration between different components of the
//! system: end-to-end delivery runs over the loopback transport, scheduler
//! timing contracts, and statistics-store behavior under concurrency.

#[path = "integration/delivery_verification.rs"]
mod delivery_verification;

#[path = "integration/scheduler_timing.rs"]
mod scheduler_timing;

#[path = "integration/statistics_properties.rs"]
mod statistics_properties;
