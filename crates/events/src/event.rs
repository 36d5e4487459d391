use serde::{Deserialize, Serialize};

use sekiban_core::{EventId, PartitionKeys, SortableUniqueId};

/// Domain-specific event data.
///
/// Payloads are:
/// - **immutable** (treat them as facts)
/// - **named** by a stable type string used as the registry key when decoding
/// - serialized to JSON at the storage boundary, folded as typed values everywhere else
///
/// Domain event enums usually derive `Serialize` with `#[serde(untagged)]` so the
/// stored JSON is the variant's own struct, and register one decoder per variant
/// in an [`EventTypeRegistry`](crate::EventTypeRegistry).
pub trait EventPayload: Serialize + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event type name (e.g. "ItemCreated").
    fn event_type(&self) -> &'static str;

    /// Tags this event is indexed under (see `read_events_by_tag`).
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Causation/correlation bookkeeping carried by every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMetadata {
    pub causation_id: String,
    pub correlation_id: String,
    pub executed_user: String,
}

impl EventMetadata {
    pub fn new(
        causation_id: impl Into<String>,
        correlation_id: impl Into<String>,
        executed_user: impl Into<String>,
    ) -> Self {
        Self {
            causation_id: causation_id.into(),
            correlation_id: correlation_id.into(),
            executed_user: executed_user.into(),
        }
    }
}

/// One committed domain fact with its ordering and partition information.
///
/// Ordering is total within a partition via `version` and global via
/// `sortable_unique_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    id: EventId,
    payload: P,
    partition_keys: PartitionKeys,
    sortable_unique_id: SortableUniqueId,
    version: u64,
    metadata: EventMetadata,
    tags: Vec<String>,
}

impl<P> Event<P> {
    pub fn new(
        id: EventId,
        payload: P,
        partition_keys: PartitionKeys,
        sortable_unique_id: SortableUniqueId,
        version: u64,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            id,
            payload,
            partition_keys,
            sortable_unique_id,
            version,
            metadata,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn partition_keys(&self) -> &PartitionKeys {
        &self.partition_keys
    }

    pub fn sortable_unique_id(&self) -> &SortableUniqueId {
        &self.sortable_unique_id
    }

    /// Position within the partition (1-based).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P: EventPayload> Event<P> {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}
