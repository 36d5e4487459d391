use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sekiban_core::{EventId, ExpectedLastId, PartitionKeys, SortableUniqueId};
use sekiban_events::{DecodeError, EventMetadata, EventPayload, SerializedEvent};

use super::query::EventRetrievalInfo;

/// A committed event as stored (assigned a partition version).
pub type StoredEvent = SerializedEvent;

/// An event ready to be written (not yet assigned a partition version).
///
/// ## Event Lifecycle
///
/// 1. **Payload**: produced by a command handler
/// 2. **UncommittedEvent**: serialized, stamped with id, partition keys and sortable id
/// 3. **StoredEvent**: persisted with its partition `version`
/// 4. **Event<P>**: decoded again through the registry by consumers
///
/// The sortable id is assigned by the writer (from the injected clock), the
/// version by the store. Use [`UncommittedEvent::from_typed`] to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub id: EventId,
    pub event_type: String,
    pub payload: JsonValue,
    pub partition_keys: PartitionKeys,
    pub sortable_unique_id: SortableUniqueId,
    pub metadata: EventMetadata,
    pub tags: Vec<String>,
}

impl UncommittedEvent {
    /// Serialize a typed payload into an uncommitted event.
    pub fn from_typed<P>(
        id: EventId,
        partition_keys: PartitionKeys,
        sortable_unique_id: SortableUniqueId,
        metadata: EventMetadata,
        payload: &P,
    ) -> Result<Self, EventStoreError>
    where
        P: EventPayload,
    {
        let json = serde_json::to_value(payload).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            id,
            event_type: payload.event_type().to_string(),
            payload: json,
            partition_keys,
            sortable_unique_id,
            metadata,
            tags: payload.tags(),
        })
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub(crate) fn commit(self, version: u64) -> StoredEvent {
        StoredEvent {
            id: self.id,
            event_type: self.event_type,
            payload: self.payload,
            partition_keys: self.partition_keys,
            sortable_unique_id: self.sortable_unique_id,
            version,
            metadata: self.metadata,
            tags: self.tags,
        }
    }
}

/// Per-tag outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagWriteResult {
    pub tag: String,
    pub last_sortable_unique_id: SortableUniqueId,
    pub event_count: usize,
}

/// Outcome of [`EventStore::write_events`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteResult {
    pub events: Vec<StoredEvent>,
    pub tag_results: Vec<TagWriteResult>,
    /// Committed events the bus refused; the write itself stands.
    pub publish_failures: usize,
}

impl WriteResult {
    pub fn last_sortable_unique_id(&self) -> Option<&SortableUniqueId> {
        self.events.last().map(|e| &e.sortable_unique_id)
    }
}

/// Event store operation error.
///
/// ## Error Categories
///
/// - **Concurrency**: the partition's last id no longer matches the expectation
/// - **InvalidAppend**: malformed batch (mixed partitions, out-of-order ids)
/// - **Unavailable**: transient backend failure; read paths retry these
/// - **Corrupt**: stored data violates an invariant (e.g. malformed id)
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed (expected: {expected:?}, actual: {actual:?})")]
    Concurrency {
        expected: ExpectedLastId,
        actual: Option<SortableUniqueId>,
    },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl EventStoreError {
    /// Worth retrying the same read after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, EventStoreError::Unavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::Concurrency { .. })
    }
}

/// Append-only event log with per-partition ordering and a global stream.
///
/// ## Design Principles
///
/// - **No storage assumptions**: in-memory for tests, SQL/NoSQL adapters elsewhere
/// - **Optimistic locking**: writes carry an [`ExpectedLastId`]; no cross-store locks
/// - **Append-only**: events are never modified or deleted
/// - **Finite reads**: every read returns a snapshot `Vec`; resume with the last id
///
/// ## Write Semantics
///
/// `write_events()`:
/// - requires the whole batch to target one partition
/// - checks the expectation against the partition's current last id
/// - requires strictly increasing sortable ids, above the partition's last id
/// - assigns versions starting at `current_version + 1`
/// - persists the batch atomically (all or nothing)
///
/// Expected conditions (conflict, empty result) are `Err`/empty values,
/// never panics.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Every event with an id after `since`, in sortable-id order.
    async fn read_all_events(
        &self,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Events carrying `tag`, after `since`, in sortable-id order.
    async fn read_events_by_tag(
        &self,
        tag: &str,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Parameterized read (partition filters, id condition, max count).
    async fn get_events(
        &self,
        info: &EventRetrievalInfo,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Conditional append to a single partition.
    async fn write_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedLastId,
    ) -> Result<WriteResult, EventStoreError>;

    /// Current last sortable id of a partition (`None` when empty).
    async fn last_sortable_unique_id(
        &self,
        partition_keys: &PartitionKeys,
    ) -> Result<Option<SortableUniqueId>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn read_all_events(
        &self,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_all_events(since).await
    }

    async fn read_events_by_tag(
        &self,
        tag: &str,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_events_by_tag(tag, since).await
    }

    async fn get_events(
        &self,
        info: &EventRetrievalInfo,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).get_events(info).await
    }

    async fn write_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedLastId,
    ) -> Result<WriteResult, EventStoreError> {
        (**self).write_events(events, expected).await
    }

    async fn last_sortable_unique_id(
        &self,
        partition_keys: &PartitionKeys,
    ) -> Result<Option<SortableUniqueId>, EventStoreError> {
        (**self).last_sortable_unique_id(partition_keys).await
    }
}
