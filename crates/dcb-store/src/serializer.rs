//! A stable JSON codec for the discriminated event envelope.
//!
//! Writes are always minified (`serde_json::to_vec`, no indentation).
//! `serde_json`'s reader is whitespace-insensitive, so the same decode path
//! accepts both minified and pretty-printed input without special-casing.
//! Unknown event types are rejected at the [`dcb_core::DomainEvent`]
//! deserialization boundary in `dcb-core::event`, not here: this module only
//! knows about the envelope, never the closed event-type union itself.

use dcb_core::{EventEnvelope, StoreError};

/// Encodes an envelope as minified JSON bytes.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the envelope cannot be encoded
/// (practically unreachable for a well-formed envelope, but surfaced rather
/// than unwrapped so callers keep a single error type).
pub fn encode(envelope: &EventEnvelope) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(envelope).map_err(StoreError::Serialization)
}

/// Decodes an envelope from JSON bytes, whether minified or pretty-printed.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if `bytes` is not a valid envelope.
pub fn decode(bytes: &[u8]) -> Result<EventEnvelope, StoreError> {
    serde_json::from_slice(bytes).map_err(StoreError::Serialization)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Panics: test-only, failure is the assertion.
mod tests {
    use super::*;
    use dcb_core::EventMetadata;

    fn sample() -> EventEnvelope {
        EventEnvelope {
            event_type: "Sample.v1".to_string(),
            payload: serde_json::json!({ "a": 1 }),
            tags: Vec::new(),
            metadata: EventMetadata::now(),
        }
    }

    #[test]
    fn decode_accepts_minified_output_of_encode() {
        let bytes = encode(&sample()).unwrap_or_else(|e| panic!("encode: {e}"));
        let decoded = decode(&bytes).unwrap_or_else(|e| panic!("decode: {e}"));
        assert_eq!(decoded.event_type, "Sample.v1");
    }

    #[test]
    fn decode_accepts_pretty_printed_input() {
        let pretty = serde_json::to_string_pretty(&sample()).unwrap_or_else(|e| panic!("pretty encode: {e}"));
        let decoded = decode(pretty.as_bytes()).unwrap_or_else(|e| panic!("decode: {e}"));
        assert_eq!(decoded.event_type, "Sample.v1");
    }
}
