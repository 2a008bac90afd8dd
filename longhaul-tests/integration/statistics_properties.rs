//! Statistics store behavior under concurrency and across input shapes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeDelta};
use longhaul_core::transport::SendOutcome;
use longhaul_core::{DeliveryCategory, OperationId, StatisticsStore};
use proptest::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_event_is_lost_under_concurrent_recording() {
    let store = Arc::new(StatisticsStore::new());
    let tasks = 8u32;
    let operations_per_task = 50u32;

    // Completion and arrival events for the same operations land from
    // different tasks, in no particular order.
    let mut handles = Vec::new();
    for task in 0..tasks {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for i in 0..operations_per_task {
                let id = OperationId::new(task * operations_per_task + i + 1);
                let now = Local::now();
                if task % 2 == 0 {
                    store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Ok, now);
                    store.record_received(DeliveryCategory::Telemetry, id, now);
                } else {
                    store.record_received(DeliveryCategory::Telemetry, id, now);
                    store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Ok, now);
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let summary = store.summary(DeliveryCategory::Telemetry);
    assert_eq!(summary.count_sent, tasks * operations_per_task);
    assert_eq!(summary.count_received, tasks * operations_per_task);
}

#[tokio::test]
async fn test_summary_snapshot_is_consistent_while_recording() {
    let store = Arc::new(StatisticsStore::new());
    let writer_store = Arc::clone(&store);

    let writer = tokio::spawn(async move {
        for i in 1..=200u32 {
            let id = OperationId::new(i);
            let now = Local::now();
            writer_store.record_sent(DeliveryCategory::CloudToDevice, id, SendOutcome::Ok, now);
            writer_store.record_received(DeliveryCategory::CloudToDevice, id, now);
            if i % 50 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    });

    // Snapshots taken mid-run never observe an arrival without the record
    // it belongs to having a consistent shape.
    for _ in 0..20 {
        let summary = store.summary(DeliveryCategory::CloudToDevice);
        assert!(summary.count_received <= 200);
        assert!(summary.count_sent <= 200);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    writer.await.unwrap();
    let summary = store.summary(DeliveryCategory::CloudToDevice);
    assert_eq!(summary.count_sent, 200);
    assert_eq!(summary.count_received, 200);
}

proptest! {
    #[test]
    fn prop_travel_bounds_match_extremes(travel_secs in proptest::collection::vec(0i64..3_000, 1..40)) {
        let store = StatisticsStore::new();
        let base = Local::now();

        for (index, secs) in travel_secs.iter().enumerate() {
            let id = OperationId::new(index as u32 + 1);
            store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Ok, base);
            store.record_received(
                DeliveryCategory::Telemetry,
                id,
                base + TimeDelta::seconds(*secs),
            );
        }

        let summary = store.summary(DeliveryCategory::Telemetry);
        let expected_min = *travel_secs.iter().min().unwrap() as u64;
        let expected_max = *travel_secs.iter().max().unwrap() as u64;

        prop_assert_eq!(summary.count_sent as usize, travel_secs.len());
        prop_assert_eq!(summary.count_received as usize, travel_secs.len());
        prop_assert_eq!(summary.min_travel_time, Some(Duration::from_secs(expected_min)));
        prop_assert_eq!(summary.max_travel_time, Some(Duration::from_secs(expected_max)));
    }

    #[test]
    fn prop_incomplete_records_never_affect_bounds(
        complete_secs in proptest::collection::vec(1i64..100, 1..10),
        lost in 1u32..10,
    ) {
        let store = StatisticsStore::new();
        let base = Local::now();

        for (index, secs) in complete_secs.iter().enumerate() {
            let id = OperationId::new(index as u32 + 1);
            store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Ok, base);
            store.record_received(
                DeliveryCategory::Telemetry,
                id,
                base + TimeDelta::seconds(*secs),
            );
        }

        // Sent-only records: counted, never part of the travel bounds
        for offset in 0..lost {
            let id = OperationId::new(1_000 + offset);
            store.record_sent(DeliveryCategory::Telemetry, id, SendOutcome::Error, base);
        }

        let summary = store.summary(DeliveryCategory::Telemetry);
        let expected_max = *complete_secs.iter().max().unwrap() as u64;

        prop_assert_eq!(
            summary.count_sent as usize,
            complete_secs.len() + lost as usize
        );
        prop_assert_eq!(summary.count_received as usize, complete_secs.len());
        prop_assert_eq!(summary.max_travel_time, Some(Duration::from_secs(expected_max)));
    }
}
