//! Append-only event store boundary.
//!
//! This module defines an infrastructure-facing abstraction for writing
//! partitioned event streams and reading them back per partition, per tag or
//! globally, without making any storage assumptions.

pub mod in_memory;
pub mod query;
pub mod r#trait;

use async_trait::async_trait;
use tracing::warn;

use sekiban_core::{ExpectedLastId, PartitionKeys, SortableUniqueId};
use sekiban_events::EventBus;

pub use in_memory::{InMemoryEventStore, ReadRecord};
pub use query::{EventRetrievalInfo, SortableIdCondition};
pub use r#trait::{EventStore, EventStoreError, StoredEvent, TagWriteResult, UncommittedEvent, WriteResult};

/// Adapter that publishes committed events to an `EventBus` after a successful write.
///
/// This ensures the ordering invariant: **publish happens only after the write succeeds**.
/// Publication failures are counted on [`WriteResult::publish_failures`], never returned
/// as errors, since the events are already committed.
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

#[async_trait]
impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: EventBus<StoredEvent>,
{
    async fn read_all_events(
        &self,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.read_all_events(since).await
    }

    async fn read_events_by_tag(
        &self,
        tag: &str,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.read_events_by_tag(tag, since).await
    }

    async fn get_events(
        &self,
        info: &EventRetrievalInfo,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.get_events(info).await
    }

    async fn write_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedLastId,
    ) -> Result<WriteResult, EventStoreError> {
        // 1) Write (durable step)
        let mut result = self.store.write_events(events, expected).await?;

        // 2) Publish every committed event; a refused one never undoes the write
        for e in &result.events {
            if let Err(err) = self.bus.publish(e.clone()) {
                warn!(event_id = %e.id, error = ?err, "event publication failed after write");
                result.publish_failures += 1;
            }
        }

        Ok(result)
    }

    async fn last_sortable_unique_id(
        &self,
        partition_keys: &PartitionKeys,
    ) -> Result<Option<SortableUniqueId>, EventStoreError> {
        self.store.last_sortable_unique_id(partition_keys).await
    }
}
