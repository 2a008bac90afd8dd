//! Event ledger recording queue, completion and arrival events per operation.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

use super::{DeliveryCategory, DeliverySummary};
use crate::correlation::OperationId;
use crate::transport::{ConnectionStatus, ConnectionStatusReason, SendOutcome};

/// One operation's accumulated events.
///
/// Fields are filled in incrementally, in any order, from different tasks:
/// the producer records the queue event, the completion callback records the
/// send event, and the receiver callback records the arrival. Every field is
/// write-once; later writes for an already-set field are ignored. For device
/// methods `sent_at` holds the invocation time and `result_code` the
/// invocation result.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub operation_id: OperationId,
    pub queued_at: Option<DateTime<Local>>,
    /// Whether the local send/invoke call itself succeeded
    pub send_result: Option<bool>,
    pub sent_at: Option<DateTime<Local>>,
    /// Result reported by the completion callback
    pub send_outcome: Option<SendOutcome>,
    pub received_at: Option<DateTime<Local>>,
    /// Device methods only
    pub result_code: Option<i32>,
}

impl DeliveryRecord {
    fn new(operation_id: OperationId) -> Self {
        Self {
            operation_id,
            queued_at: None,
            send_result: None,
            sent_at: None,
            send_outcome: None,
            received_at: None,
            result_code: None,
        }
    }
}

/// A connection status change reported by the device client.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionEvent {
    pub status: ConnectionStatus,
    pub reason: ConnectionStatusReason,
    pub at: DateTime<Local>,
}

/// Sets an optional field only if it has not been set before.
fn set_once<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

/// Concurrent event ledger, one record map per delivery category.
///
/// Record calls are atomic with respect to each other and to summary
/// snapshots: each category map sits behind its own mutex with short
/// critical sections, safe to take from sync callbacks and async tasks
/// alike. Records are created implicitly on first event and never deleted.
#[derive(Debug, Default)]
pub struct StatisticsStore {
    telemetry: Mutex<HashMap<OperationId, DeliveryRecord>>,
    cloud_to_device: Mutex<HashMap<OperationId, DeliveryRecord>>,
    device_method: Mutex<HashMap<OperationId, DeliveryRecord>>,
    connection_events: Mutex<Vec<ConnectionEvent>>,
}

impl StatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self, category: DeliveryCategory) -> &Mutex<HashMap<OperationId, DeliveryRecord>> {
        match category {
            DeliveryCategory::Telemetry => &self.telemetry,
            DeliveryCategory::CloudToDevice => &self.cloud_to_device,
            DeliveryCategory::DeviceMethod => &self.device_method,
        }
    }

    /// Records that an operation was queued, with the local send call result.
    pub fn record_queued(
        &self,
        category: DeliveryCategory,
        operation_id: OperationId,
        send_succeeded: bool,
        queued_at: DateTime<Local>,
    ) {
        let mut ledger = self.ledger(category).lock();
        let record = ledger
            .entry(operation_id)
            .or_insert_with(|| DeliveryRecord::new(operation_id));
        set_once(&mut record.queued_at, queued_at);
        set_once(&mut record.send_result, send_succeeded);
    }

    /// Records a send completion reported by the transport callback.
    pub fn record_sent(
        &self,
        category: DeliveryCategory,
        operation_id: OperationId,
        outcome: SendOutcome,
        sent_at: DateTime<Local>,
    ) {
        let mut ledger = self.ledger(category).lock();
        let record = ledger
            .entry(operation_id)
            .or_insert_with(|| DeliveryRecord::new(operation_id));
        set_once(&mut record.sent_at, sent_at);
        set_once(&mut record.send_outcome, outcome);
    }

    /// Records a device method invocation and its result code.
    pub fn record_invoked(
        &self,
        operation_id: OperationId,
        result_code: i32,
        invoked_at: DateTime<Local>,
    ) {
        let mut ledger = self.ledger(DeliveryCategory::DeviceMethod).lock();
        let record = ledger
            .entry(operation_id)
            .or_insert_with(|| DeliveryRecord::new(operation_id));
        set_once(&mut record.sent_at, invoked_at);
        set_once(&mut record.result_code, result_code);
    }

    /// Records an arrival observed by a receiver callback.
    pub fn record_received(
        &self,
        category: DeliveryCategory,
        operation_id: OperationId,
        received_at: DateTime<Local>,
    ) {
        let mut ledger = self.ledger(category).lock();
        let record = ledger
            .entry(operation_id)
            .or_insert_with(|| DeliveryRecord::new(operation_id));
        set_once(&mut record.received_at, received_at);
    }

    /// Records a connection status change.
    pub fn add_connection_status(&self, status: ConnectionStatus, reason: ConnectionStatusReason) {
        self.connection_events.lock().push(ConnectionEvent {
            status,
            reason,
            at: Local::now(),
        });
    }

    /// Computes the summary for a category from a consistent snapshot.
    pub fn summary(&self, category: DeliveryCategory) -> DeliverySummary {
        let ledger = self.ledger(category).lock();
        DeliverySummary::compute(category, ledger.values())
    }

    /// Serializes all stored state into a human-diagnostic JSON dump.
    ///
    /// Used only for logging; a serialization failure degrades to an empty
    /// object rather than erroring the run.
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct Snapshot {
            telemetry: Vec<DeliveryRecord>,
            cloud_to_device: Vec<DeliveryRecord>,
            device_method: Vec<DeliveryRecord>,
            connection_events: Vec<ConnectionEvent>,
        }

        fn sorted(ledger: &Mutex<HashMap<OperationId, DeliveryRecord>>) -> Vec<DeliveryRecord> {
            let mut records: Vec<DeliveryRecord> = ledger.lock().values().cloned().collect();
            records.sort_by_key(|r| r.operation_id);
            records
        }

        let snapshot = Snapshot {
            telemetry: sorted(&self.telemetry),
            cloud_to_device: sorted(&self.cloud_to_device),
            device_method: sorted(&self.device_method),
            connection_events: self.connection_events.lock().clone(),
        };

        serde_json::to_string(&snapshot).unwrap_or_else(|e| {
            tracing::error!("Failed serializing statistics dump: {e}");
            "{}".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn test_records_are_created_implicitly_in_any_order() {
        let store = StatisticsStore::new();
        let id = OperationId::new(1);
        let now = Local::now();

        // Arrival before queue: both land on the same record
        store.record_received(DeliveryCategory::Telemetry, id, now);
        store.record_queued(DeliveryCategory::Telemetry, id, true, now);

        let dump = store.to_json();
        assert!(dump.contains("\"operation_id\":1"));

        let summary = store.summary(DeliveryCategory::Telemetry);
        assert_eq!(summary.count_received, 1);
        assert_eq!(summary.count_sent, 0);
    }

    #[test]
    fn test_fields_are_write_once() {
        let store = StatisticsStore::new();
        let id = OperationId::new(1);
        let first = Local::now();
        let later = first + TimeDelta::seconds(10);

        store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Ok, first);
        store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Error, later);
        store.record_received(DeliveryCategory::Telemetry, id, later);
        store.record_received(
            DeliveryCategory::Telemetry,
            id,
            later + TimeDelta::seconds(60),
        );

        let summary = store.summary(DeliveryCategory::Telemetry);
        // First writes stick: travel time stays 10s, not 0 or 70
        assert_eq!(
            summary.max_travel_time,
            Some(std::time::Duration::from_secs(10))
        );
        assert_eq!(summary.min_travel_time, summary.max_travel_time);
    }

    #[test]
    fn test_summary_counts_and_travel_bounds() {
        let store = StatisticsStore::new();
        let base = Local::now();

        // 5 operations, travel times 1..=5 seconds
        for i in 1..=5u32 {
            let id = OperationId::new(i);
            store.record_queued(DeliveryCategory::Telemetry, id, true, base);
            store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Ok, base);
            store.record_received(
                DeliveryCategory::Telemetry,
                id,
                base + TimeDelta::seconds(i64::from(i)),
            );
        }

        let summary = store.summary(DeliveryCategory::Telemetry);
        assert_eq!(summary.count_sent, 5);
        assert_eq!(summary.count_received, 5);
        assert_eq!(
            summary.min_travel_time,
            Some(std::time::Duration::from_secs(1))
        );
        assert_eq!(
            summary.max_travel_time,
            Some(std::time::Duration::from_secs(5))
        );
    }

    #[test]
    fn test_incomplete_records_counted_but_excluded_from_bounds() {
        let store = StatisticsStore::new();
        let base = Local::now();

        let complete = OperationId::new(1);
        store.record_sent(DeliveryCategory::CloudToDevice, complete, SendOutcome::Ok, base);
        store.record_received(
            DeliveryCategory::CloudToDevice,
            complete,
            base + TimeDelta::seconds(2),
        );

        // Sent but never received
        let lost = OperationId::new(2);
        store.record_sent(DeliveryCategory::CloudToDevice, lost, SendOutcome::Ok, base);

        // Received but never confirmed sent
        let stray = OperationId::new(3);
        store.record_received(DeliveryCategory::CloudToDevice, stray, base);

        let summary = store.summary(DeliveryCategory::CloudToDevice);
        assert_eq!(summary.count_sent, 2);
        assert_eq!(summary.count_received, 2);
        assert_eq!(
            summary.min_travel_time,
            Some(std::time::Duration::from_secs(2))
        );
        assert_eq!(summary.max_travel_time, summary.min_travel_time);
    }

    #[test]
    fn test_categories_are_independent() {
        let store = StatisticsStore::new();
        let id = OperationId::new(1);
        let now = Local::now();

        store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Ok, now);

        assert_eq!(store.summary(DeliveryCategory::Telemetry).count_sent, 1);
        assert_eq!(store.summary(DeliveryCategory::CloudToDevice).count_sent, 0);
        assert_eq!(store.summary(DeliveryCategory::DeviceMethod).count_sent, 0);
    }

    #[test]
    fn test_method_invocation_records() {
        let store = StatisticsStore::new();
        let id = OperationId::new(1);
        let now = Local::now();

        store.record_invoked(id, 200, now);
        store.record_received(DeliveryCategory::DeviceMethod, id, now + TimeDelta::seconds(1));

        let summary = store.summary(DeliveryCategory::DeviceMethod);
        assert_eq!(summary.count_sent, 1);
        assert_eq!(summary.count_received, 1);

        let dump = store.to_json();
        assert!(dump.contains("\"result_code\":200"));
    }

    #[test]
    fn test_connection_events_are_recorded() {
        let store = StatisticsStore::new();
        store.add_connection_status(ConnectionStatus::Connected, ConnectionStatusReason::Ok);
        store.add_connection_status(
            ConnectionStatus::Disconnected,
            ConnectionStatusReason::NoNetwork,
        );

        let dump = store.to_json();
        assert!(dump.contains("Connected"));
        assert!(dump.contains("NoNetwork"));
    }
}
