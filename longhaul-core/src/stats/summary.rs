//! Summary computation and verdict thresholds.

use std::time::Duration;

use serde::Serialize;

use super::{DeliveryCategory, store::DeliveryRecord};
use crate::{LonghaulError, Result};

/// Aggregate numbers for one delivery category, derived on demand.
///
/// `count_sent` counts records with a completion/invocation timestamp,
/// `count_received` counts records with an arrival timestamp. Travel-time
/// bounds only consider records carrying both ends; incomplete records are
/// excluded from the bounds but still counted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliverySummary {
    pub category: DeliveryCategory,
    pub count_sent: u32,
    pub count_received: u32,
    pub min_travel_time: Option<Duration>,
    pub max_travel_time: Option<Duration>,
}

impl DeliverySummary {
    /// Computes the summary from a snapshot of a category's records.
    pub(crate) fn compute<'a>(
        category: DeliveryCategory,
        records: impl Iterator<Item = &'a DeliveryRecord>,
    ) -> Self {
        let mut count_sent = 0;
        let mut count_received = 0;
        let mut min_travel_time: Option<Duration> = None;
        let mut max_travel_time: Option<Duration> = None;

        for record in records {
            if record.sent_at.is_some() {
                count_sent += 1;
            }
            if record.received_at.is_some() {
                count_received += 1;
            }

            if let (Some(sent_at), Some(received_at)) = (record.sent_at, record.received_at) {
                // The arrival can be observed before the completion callback
                // fires; clamp those races to zero travel time.
                let travel = (received_at - sent_at).to_std().unwrap_or(Duration::ZERO);
                min_travel_time = Some(min_travel_time.map_or(travel, |min| min.min(travel)));
                max_travel_time = Some(max_travel_time.map_or(travel, |max| max.max(travel)));
            }
        }

        Self {
            category,
            count_sent,
            count_received,
            min_travel_time,
            max_travel_time,
        }
    }

    /// Applies the pass/fail thresholds for this category.
    ///
    /// # Errors
    ///
    /// `LonghaulError::Verdict` when nothing was sent, when the received
    /// count does not match the sent count, or when the maximum observed
    /// travel time exceeds `max_travel_time`.
    pub fn verdict(&self, max_travel_time: Duration) -> Result<()> {
        if self.count_sent == 0 {
            return Err(LonghaulError::Verdict {
                reason: format!("no {} operations were sent", self.category),
            });
        }

        if self.count_received != self.count_sent {
            return Err(LonghaulError::Verdict {
                reason: format!(
                    "{}: received {} of {} operations",
                    self.category, self.count_received, self.count_sent
                ),
            });
        }

        if self.max_travel_time.is_some_and(|max| max > max_travel_time) {
            return Err(LonghaulError::Verdict {
                reason: format!(
                    "{}: max travel time {:?} exceeds {:?}",
                    self.category,
                    self.max_travel_time.unwrap_or_default(),
                    max_travel_time
                ),
            });
        }

        Ok(())
    }
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: sent={}, received={}; travel time: min={:?}, max={:?}",
            self.category, self.count_sent, self.count_received, self.min_travel_time,
            self.max_travel_time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(sent: u32, received: u32, max_secs: Option<u64>) -> DeliverySummary {
        DeliverySummary {
            category: DeliveryCategory::Telemetry,
            count_sent: sent,
            count_received: received,
            min_travel_time: max_secs.map(|_| Duration::from_secs(1)),
            max_travel_time: max_secs.map(Duration::from_secs),
        }
    }

    const THRESHOLD: Duration = Duration::from_secs(300);

    #[test]
    fn test_verdict_passes_within_threshold() {
        assert!(summary(5, 5, Some(299)).verdict(THRESHOLD).is_ok());
    }

    #[test]
    fn test_verdict_fails_on_missing_arrivals() {
        let result = summary(5, 4, Some(10)).verdict(THRESHOLD);
        assert!(matches!(result, Err(LonghaulError::Verdict { .. })));
    }

    #[test]
    fn test_verdict_fails_on_nothing_sent() {
        let result = summary(0, 0, None).verdict(THRESHOLD);
        assert!(matches!(result, Err(LonghaulError::Verdict { .. })));
    }

    #[test]
    fn test_verdict_fails_on_slow_travel() {
        let result = summary(5, 5, Some(301)).verdict(THRESHOLD);
        assert!(matches!(result, Err(LonghaulError::Verdict { .. })));
    }

    #[test]
    fn test_verdict_passes_at_exact_threshold() {
        // The bound is strict "exceeds", not "reaches"
        assert!(summary(5, 5, Some(300)).verdict(THRESHOLD).is_ok());
    }

    #[test]
    fn test_summary_display_is_readable() {
        let line = summary(5, 5, Some(2)).to_string();
        assert!(line.contains("sent=5"));
        assert!(line.contains("received=5"));
    }
}
