//! Concurrent per-category event ledger and summary computation.
//!
//! The statistics store is the only shared mutable state between the
//! production loop and the transport's callback tasks. Records accumulate
//! write-once fields as events arrive in any order; summaries are consistent
//! snapshots taken under the category lock.

pub mod store;
pub mod summary;

use std::fmt;

use serde::Serialize;

pub use store::{ConnectionEvent, DeliveryRecord, StatisticsStore};
pub use summary::DeliverySummary;

/// Delivery categories tracked by the store, one ledger each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeliveryCategory {
    Telemetry,
    CloudToDevice,
    DeviceMethod,
}

impl fmt::Display for DeliveryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryCategory::Telemetry => write!(f, "telemetry"),
            DeliveryCategory::CloudToDevice => write!(f, "cloud-to-device"),
            DeliveryCategory::DeviceMethod => write!(f, "device-method"),
        }
    }
}
