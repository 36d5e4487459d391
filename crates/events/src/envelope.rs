use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use sekiban_core::{EventId, PartitionKeys, SortableUniqueId};

use crate::event::EventMetadata;

/// Storage/wire form of an event: the payload is JSON plus its type name.
///
/// This is what stores persist and what the event bus carries. Turning it back
/// into a typed [`Event`](crate::Event) goes through an
/// [`EventTypeRegistry`](crate::EventTypeRegistry), which rejects unknown types
/// instead of defaulting them.
///
/// Notes:
/// - `version` is the 1-based position inside the partition, assigned on append.
/// - `sortable_unique_id` orders the global log and is the concurrency token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    pub id: EventId,
    pub event_type: String,
    pub payload: JsonValue,
    pub partition_keys: PartitionKeys,
    pub sortable_unique_id: SortableUniqueId,
    pub version: u64,
    pub metadata: EventMetadata,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SerializedEvent {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
