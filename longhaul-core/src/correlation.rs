//! Correlation identifiers tying produced operations to their completions.
//!
//! Every outbound payload carries the run's id and a per-run operation id.
//! Receiver paths decode the envelope, discard anything that does not belong
//! to the local run, and use the operation id to match the arrival against
//! the record created at production time.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Per-run unique identifier correlating an operation with its completion.
///
/// Value 0 is reserved as the sentinel for "generation failed" and is never
/// assigned to a real operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct OperationId(pub u32);

impl OperationId {
    /// Sentinel returned when id generation fails.
    pub const INVALID: OperationId = OperationId(0);

    /// Creates OperationId from a raw counter value.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns false for the reserved sentinel value.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns the underlying id as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors produced while encoding or decoding correlation envelopes.
///
/// Decode failures are never fatal to a run: receiver paths treat them as
/// "not ours" and drop the message.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("Malformed envelope payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("Envelope payload is not valid UTF-8")]
    InvalidEncoding,
}

/// The correlation fields embedded in every application message body.
///
/// Wire field names match the original longhaul message format so runs can
/// share infrastructure with other producers and still isolate their own
/// traffic by `test_run_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEnvelope {
    #[serde(rename = "longhaul-tests")]
    pub test_run_id: String,
    #[serde(rename = "message-id")]
    pub operation_id: OperationId,
}

impl CorrelationEnvelope {
    /// Creates an envelope for the given run and operation.
    pub fn new(test_run_id: impl Into<String>, operation_id: OperationId) -> Self {
        Self {
            test_run_id: test_run_id.into(),
            operation_id,
        }
    }

    /// Serializes the envelope into its JSON payload.
    ///
    /// # Errors
    /// - `CorrelationError::MalformedPayload` - Serialization failed
    pub fn encode(&self) -> Result<String, CorrelationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an inbound payload back into an envelope.
    ///
    /// Fails explicitly on any payload that is not well-formed JSON carrying
    /// both correlation fields; there is no partial or default result.
    ///
    /// # Errors
    /// - `CorrelationError::InvalidEncoding` - Payload is not UTF-8 text
    /// - `CorrelationError::MalformedPayload` - Payload is not a valid envelope
    pub fn decode(payload: &[u8]) -> Result<Self, CorrelationError> {
        let text = std::str::from_utf8(payload).map_err(|_| CorrelationError::InvalidEncoding)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Returns true when the envelope belongs to the given run.
    pub fn matches_run(&self, test_run_id: &str) -> bool {
        self.test_run_id == test_run_id
    }
}

/// Decodes an inbound payload and extracts the operation id when it belongs
/// to `test_run_id`.
///
/// This is the matching policy shared by every receiver path: parse errors
/// and foreign envelopes yield `None` (logged at debug, never propagated),
/// a match yields the operation id to record against.
pub fn match_inbound(payload: &[u8], test_run_id: &str) -> Option<OperationId> {
    match CorrelationEnvelope::decode(payload) {
        Ok(envelope) if envelope.matches_run(test_run_id) => Some(envelope.operation_id),
        Ok(envelope) => {
            tracing::debug!(
                foreign_run = %envelope.test_run_id,
                "Dropping envelope from another run"
            );
            None
        }
        Err(e) => {
            tracing::debug!("Dropping unparseable inbound payload: {e}");
            None
        }
    }
}

/// Thread-safe generator of per-run operation ids.
///
/// Holds the run's monotonic counter behind an exclusive lock; increments
/// are totally ordered. Owned by the run's resources, never process-global.
#[derive(Debug, Default)]
pub struct OperationIdGenerator {
    counter: Mutex<u32>,
}

impl OperationIdGenerator {
    /// Creates a generator starting at zero; the first id handed out is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next operation id, pre-incrementing the counter.
    ///
    /// Returns `OperationId::INVALID` only when the lock cannot be acquired
    /// (poisoned by a panicking holder). Callers must treat the sentinel as
    /// a hard failure of the entire operation attempt.
    pub fn next_id(&self) -> OperationId {
        match self.counter.lock() {
            Ok(mut counter) => {
                *counter += 1;
                OperationId(*counter)
            }
            Err(_) => {
                tracing::error!("Failed to lock operation id counter");
                OperationId::INVALID
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_envelope_encode_decode() {
        let envelope = CorrelationEnvelope::new("run-a", OperationId::new(42));
        let payload = envelope.encode().unwrap();

        // Wire field names are part of the format
        assert!(payload.contains("longhaul-tests"));
        assert!(payload.contains("message-id"));

        let decoded = CorrelationEnvelope::decode(payload.as_bytes()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let result = CorrelationEnvelope::decode(b"this is not json");
        assert!(matches!(result, Err(CorrelationError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let result = CorrelationEnvelope::decode(br#"{"longhaul-tests": "run-a"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_rejects_non_utf8() {
        let result = CorrelationEnvelope::decode(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(CorrelationError::InvalidEncoding)));
    }

    #[test]
    fn test_match_inbound_accepts_own_run() {
        let payload = CorrelationEnvelope::new("run-a", OperationId::new(7))
            .encode()
            .unwrap();
        assert_eq!(
            match_inbound(payload.as_bytes(), "run-a"),
            Some(OperationId::new(7))
        );
    }

    #[test]
    fn test_match_inbound_drops_foreign_run() {
        let payload = CorrelationEnvelope::new("run-b", OperationId::new(7))
            .encode()
            .unwrap();
        assert_eq!(match_inbound(payload.as_bytes(), "run-a"), None);
    }

    #[test]
    fn test_match_inbound_drops_garbage() {
        assert_eq!(match_inbound(b"{\"partial\":", "run-a"), None);
    }

    #[test]
    fn test_next_id_is_sequential_and_nonzero() {
        let generator = OperationIdGenerator::new();
        assert_eq!(generator.next_id(), OperationId::new(1));
        assert_eq!(generator.next_id(), OperationId::new(2));
        assert!(generator.next_id().is_valid());
    }

    #[test]
    fn test_concurrent_ids_are_a_permutation() {
        let generator = Arc::new(OperationIdGenerator::new());
        let threads: u32 = 8;
        let ids_per_thread: u32 = 50;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || {
                    (0..ids_per_thread)
                        .map(|_| generator.next_id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all_ids: Vec<OperationId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        all_ids.sort();
        let expected: Vec<OperationId> = (1..=threads * ids_per_thread)
            .map(OperationId::new)
            .collect();

        // No duplicates, no zeros, exactly 1..=N
        assert_eq!(all_ids, expected);
    }

    #[test]
    fn test_sentinel_is_invalid() {
        assert!(!OperationId::INVALID.is_valid());
        assert_eq!(OperationId::INVALID.as_u32(), 0);
    }

    mod decode_properties {
        use proptest::prelude::*;

        use super::super::CorrelationEnvelope;

        proptest! {
            // Decoding must always yield an explicit result for whatever
            // bytes arrive off the wire, never a partial envelope.
            #[test]
            fn prop_decode_arbitrary_bytes_never_panics(
                payload in proptest::collection::vec(any::<u8>(), 0..256)
            ) {
                if let Ok(envelope) = CorrelationEnvelope::decode(&payload) {
                    let reencoded = envelope.encode().unwrap();
                    prop_assert_eq!(
                        CorrelationEnvelope::decode(reencoded.as_bytes()).unwrap(),
                        envelope
                    );
                }
            }
        }
    }
}
