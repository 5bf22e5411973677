//! The event model: metadata, the `DomainEvent` trait, and the positioned
//! envelope returned from reads.
//!
//! Domain payloads implement [`DomainEvent`] and are carried as opaque,
//! discriminator-tagged bytes ([`EventEnvelope`]) once they cross the
//! storage boundary. The discriminator is the event's `event_type()`,
//! embedded in the serialized envelope so a closed union of payload types
//! round-trips without external schema information.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;
use crate::position::Position;
use crate::tag::Tag;

/// A domain event payload belonging to a closed, discriminated union.
///
/// Implementations are typically an `enum` covering every event type one
/// store context will ever see. `event_type()` must be a stable, versioned
/// name (for example `"UserRegistered.v1"`); it becomes the discriminator
/// persisted alongside the payload and the key used by the event-type index.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The stable discriminator naming this event's schema.
    fn event_type(&self) -> &'static str;

    /// The tags this event carries for indexed lookup.
    ///
    /// Default: no tags. Most events will override this to tag themselves
    /// by the entities they reference.
    fn tags(&self) -> Vec<Tag> {
        Vec::new()
    }
}

/// Caller-supplied metadata accompanying an event at append time.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct EventMetadata {
    /// When the event occurred, in UTC.
    pub timestamp: DateTime<Utc>,
    /// An opaque identifier correlating this event with others in the same
    /// causal chain (a request id, a saga id, …).
    pub correlation_id: Option<String>,
    /// Implementation-defined extras, carried verbatim.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl EventMetadata {
    /// Builds metadata stamped with the current time and no correlation id.
    #[must_use]
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id: None,
            extra: serde_json::Value::Null,
        }
    }

    /// Attaches a correlation id, consuming and returning `self` for
    /// builder-style chaining.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// The on-disk envelope for one event: the serialized discriminated payload
/// plus its tags and metadata, before a position has been assigned.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct EventEnvelope {
    /// The discriminator naming the payload's schema.
    pub event_type: String,
    /// The JSON-encoded payload.
    pub payload: serde_json::Value,
    /// The event's tags.
    pub tags: Vec<Tag>,
    /// The event's metadata.
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    /// Builds an envelope from a [`DomainEvent`] and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the payload cannot be
    /// encoded as JSON.
    pub fn from_event<E: DomainEvent>(event: &E, metadata: EventMetadata) -> Result<Self, StoreError> {
        let payload = serde_json::to_value(event).map_err(StoreError::Serialization)?;
        Ok(Self {
            event_type: event.event_type().to_string(),
            payload,
            tags: event.tags(),
            metadata,
        })
    }
}

/// An event as read back from the store: its envelope plus the position the
/// store assigned it.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct SequencedEvent {
    /// The event's assigned position.
    pub position: Position,
    /// The event's envelope.
    pub envelope: EventEnvelope,
}

impl SequencedEvent {
    /// Deserializes the envelope's payload as a concrete [`DomainEvent`]
    /// type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the payload does not match
    /// the requested type.
    pub fn deserialize<E: DomainEvent>(&self) -> Result<E, StoreError> {
        serde_json::from_value(self.envelope.payload.clone()).map_err(StoreError::Serialization)
    }
}
