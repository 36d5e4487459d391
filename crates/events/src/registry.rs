//! Event type registry: type name → decoder.
//!
//! Decoders are registered once at configuration time; decoding is then a map
//! lookup plus `serde_json::from_value`, with no reflection on the fold path.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::event::{Event, EventPayload};
use crate::envelope::SerializedEvent;

/// Failure to turn a stored event back into a typed one.
///
/// Never swallowed: skipping an unreadable event would silently corrupt
/// every state derived from the stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("failed to decode payload of '{event_type}': {message}")]
    Payload { event_type: String, message: String },
}

type Decoder<P> = Box<dyn Fn(JsonValue) -> Result<P, serde_json::Error> + Send + Sync>;

/// Maps event type names to decoders producing the payload union `P`.
pub struct EventTypeRegistry<P> {
    decoders: HashMap<&'static str, Decoder<P>>,
}

impl<P> core::fmt::Debug for EventTypeRegistry<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("EventTypeRegistry")
            .field("event_types", &names)
            .finish()
    }
}

impl<P> Default for EventTypeRegistry<P> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<P: EventPayload> EventTypeRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the decoder for `event_type`: deserialize a `T`, then wrap it into `P`.
    ///
    /// Registering the same name twice replaces the earlier decoder.
    pub fn register<T>(mut self, event_type: &'static str, wrap: fn(T) -> P) -> Self
    where
        T: DeserializeOwned + 'static,
    {
        self.decoders.insert(
            event_type,
            Box::new(move |value| serde_json::from_value::<T>(value).map(wrap)),
        );
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn decode_payload(&self, event_type: &str, payload: JsonValue) -> Result<P, DecodeError> {
        let decoder = self
            .decoders
            .get(event_type)
            .ok_or_else(|| DecodeError::UnknownEventType(event_type.to_string()))?;

        decoder(payload).map_err(|e| DecodeError::Payload {
            event_type: event_type.to_string(),
            message: e.to_string(),
        })
    }

    pub fn decode(&self, stored: &SerializedEvent) -> Result<Event<P>, DecodeError> {
        let payload = self.decode_payload(&stored.event_type, stored.payload.clone())?;
        Ok(Event::new(
            stored.id,
            payload,
            stored.partition_keys.clone(),
            stored.sortable_unique_id.clone(),
            stored.version,
            stored.metadata.clone(),
        )
        .with_tags(stored.tags.clone()))
    }

    /// Decode a whole batch; the first failure aborts the batch.
    pub fn decode_all<'a>(
        &self,
        stored: impl IntoIterator<Item = &'a SerializedEvent>,
    ) -> Result<Vec<Event<P>>, DecodeError> {
        stored.into_iter().map(|e| self.decode(e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use sekiban_core::{EventId, PartitionKeys, SortableUniqueId};
    use uuid::Uuid;

    use crate::event::EventMetadata;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Opened {
        name: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(untagged)]
    enum TestEvent {
        Opened(Opened),
    }

    impl EventPayload for TestEvent {
        fn event_type(&self) -> &'static str {
            "Opened"
        }
    }

    fn stored(event_type: &str, payload: JsonValue) -> SerializedEvent {
        SerializedEvent {
            id: EventId::new(),
            event_type: event_type.to_string(),
            payload,
            partition_keys: PartitionKeys::generate("test"),
            sortable_unique_id: SortableUniqueId::generate(Utc::now(), Uuid::now_v7()),
            version: 1,
            metadata: EventMetadata::default(),
            tags: vec!["t".to_string()],
        }
    }

    fn registry() -> EventTypeRegistry<TestEvent> {
        EventTypeRegistry::new().register("Opened", TestEvent::Opened)
    }

    #[test]
    fn decodes_registered_type() {
        let s = stored("Opened", serde_json::json!({ "name": "a" }));
        let event = registry().decode(&s).unwrap();
        assert_eq!(
            event.payload(),
            &TestEvent::Opened(Opened {
                name: "a".to_string()
            })
        );
        assert_eq!(event.id(), s.id);
        assert_eq!(event.tags(), ["t".to_string()]);
    }

    #[test]
    fn unknown_type_is_an_explicit_error() {
        let s = stored("Closed", serde_json::json!({}));
        assert_eq!(
            registry().decode(&s).unwrap_err(),
            DecodeError::UnknownEventType("Closed".to_string())
        );
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let s = stored("Opened", serde_json::json!({ "nope": 1 }));
        assert!(matches!(
            registry().decode(&s),
            Err(DecodeError::Payload { .. })
        ));
    }
}
