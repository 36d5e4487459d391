//! Single-aggregate persistence: snapshot restore, delta catch-up and conditional save.
//!
//! ## Load
//!
//! ```text
//! snapshot? ──no / stale / corrupt──► rebuild from version 0
//!    │ yes
//!    ▼
//! store head == snapshot watermark? ──yes──► done
//!    │ no
//!    ▼
//! fetch events after the watermark (chunked) and fold them on top
//! ```
//!
//! Decoding failures are fatal for the load: no partial aggregate is returned.
//! Writes are never retried here; a conflict surfaces to the command executor,
//! which reloads and re-runs the handler.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use sekiban_core::{ExpectedLastId, PartitionKeys};
use sekiban_events::{
    Aggregate, DecodeError, Event, EventTypeRegistry, ProjectionError, ProjectionRunner, Projector,
};

use crate::config::SekibanOptions;
use crate::event_store::{EventRetrievalInfo, EventStore, EventStoreError, SortableIdCondition, UncommittedEvent};
use crate::retry::RetryPolicy;
use crate::snapshot::{SnapshotBlob, SnapshotError, SnapshotStore, aggregate_key};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Store(e) if e.is_conflict())
    }
}

/// Loads and saves aggregates of one projector.
pub struct AggregateRepository<S, SS, Pr>
where
    Pr: Projector,
{
    store: S,
    snapshots: SS,
    projector: Arc<Pr>,
    registry: Arc<EventTypeRegistry<Pr::Event>>,
    retry: RetryPolicy,
    catch_up_batch_size: usize,
}

impl<S, SS, Pr> core::fmt::Debug for AggregateRepository<S, SS, Pr>
where
    Pr: Projector,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AggregateRepository")
            .field("projector", &self.projector.name())
            .field("retry", &self.retry)
            .field("catch_up_batch_size", &self.catch_up_batch_size)
            .finish()
    }
}

impl<S, SS, Pr> AggregateRepository<S, SS, Pr>
where
    S: EventStore,
    SS: SnapshotStore,
    Pr: Projector,
{
    pub fn new(
        store: S,
        snapshots: SS,
        projector: Arc<Pr>,
        registry: Arc<EventTypeRegistry<Pr::Event>>,
    ) -> Self {
        let defaults = SekibanOptions::default();
        Self {
            store,
            snapshots,
            projector,
            registry,
            retry: defaults.retry,
            catch_up_batch_size: defaults.catch_up_batch_size,
        }
    }

    pub fn with_options(mut self, options: &SekibanOptions) -> Self {
        self.retry = options.retry;
        self.catch_up_batch_size = options.catch_up_batch_size.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn projector(&self) -> &Pr {
        &self.projector
    }

    pub fn registry(&self) -> &EventTypeRegistry<Pr::Event> {
        &self.registry
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Current aggregate: latest compatible snapshot plus the events written after it.
    pub async fn load(&self, keys: &PartitionKeys) -> Result<Aggregate<Pr::Payload>, RepositoryError> {
        let Some(restored) = self.restore_snapshot(keys).await else {
            return self.rebuild(keys).await;
        };

        let store = &self.store;
        let head = self
            .retry
            .retry_transient("last_sortable_unique_id", move || {
                store.last_sortable_unique_id(keys)
            })
            .await?;
        if head.as_ref() == restored.last_sortable_unique_id() {
            debug!(projector = self.projector.name(), stream = %keys, version = restored.version(), "snapshot is current");
            return Ok(restored);
        }
        self.catch_up(restored).await
    }

    /// Fold every event written after `state`'s watermark.
    pub async fn catch_up(
        &self,
        state: Aggregate<Pr::Payload>,
    ) -> Result<Aggregate<Pr::Payload>, RepositoryError> {
        let mut runner = ProjectionRunner::resume(self.projector.as_ref(), state);
        loop {
            let info = EventRetrievalInfo::for_partition(runner.state().partition_keys())
                .with_condition(SortableIdCondition::since(runner.state().last_sortable_unique_id()))
                .with_max_count(self.catch_up_batch_size);
            let store = &self.store;
            let info = &info;
            let chunk = self
                .retry
                .retry_transient("get_events", move || store.get_events(info))
                .await?;
            let events = self.registry.decode_all(&chunk)?;
            runner.run(&events)?;
            if chunk.len() < self.catch_up_batch_size {
                break;
            }
        }
        Ok(runner.into_state())
    }

    /// Replay the whole partition from version 0, ignoring any snapshot.
    pub async fn rebuild(&self, keys: &PartitionKeys) -> Result<Aggregate<Pr::Payload>, RepositoryError> {
        let state = self.catch_up(Aggregate::empty(self.projector.as_ref(), keys.clone())).await?;
        info!(projector = self.projector.name(), stream = %keys, version = state.version(), "aggregate rebuilt from event store");
        Ok(state)
    }

    /// Conditional append; returns the committed events decoded with their versions.
    pub async fn save(
        &self,
        expected: ExpectedLastId,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<Event<Pr::Event>>, RepositoryError> {
        let written = self.store.write_events(events, expected).await?;
        Ok(self.registry.decode_all(&written.events)?)
    }

    /// Persist `state` as the partition's snapshot. Version 0 is never persisted.
    pub async fn persist_snapshot(&self, state: &Aggregate<Pr::Payload>) -> Result<bool, RepositoryError> {
        if state.version() == 0 {
            return Ok(false);
        }
        let key = aggregate_key(self.projector.name(), state.partition_keys());
        let bytes = SnapshotBlob::from_aggregate(state)?.encode()?;
        self.snapshots.put(&key, bytes).await?;
        debug!(projector = self.projector.name(), stream = %state.partition_keys(), version = state.version(), "aggregate snapshot persisted");
        Ok(true)
    }

    /// A usable snapshot, or `None` when the caller must rebuild.
    async fn restore_snapshot(&self, keys: &PartitionKeys) -> Option<Aggregate<Pr::Payload>> {
        let key = aggregate_key(self.projector.name(), keys);
        let bytes = match self.snapshots.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(projector = self.projector.name(), stream = %keys, error = %err, "snapshot store read failed, rebuilding");
                return None;
            }
        };
        let restored = SnapshotBlob::decode(&bytes)
            .and_then(|blob| blob.into_aggregate(self.projector.as_ref(), keys.clone()));
        match restored {
            Ok(state) => {
                debug!(projector = self.projector.name(), stream = %keys, version = state.version(), "aggregate snapshot restored");
                Some(state)
            }
            Err(SnapshotError::ProjectorMismatch { expected, found }) => {
                info!(projector = self.projector.name(), stream = %keys, %expected, %found, "projector version changed, rebuilding aggregate");
                None
            }
            Err(err) => {
                warn!(projector = self.projector.name(), stream = %keys, error = %err, "corrupt aggregate snapshot treated as a miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use sekiban_core::{EventId, SortableUniqueId};
    use sekiban_events::EventMetadata;
    use sekiban_inventory::{InventoryEvent, InventoryItemProjector, ItemCreated, StockAdjusted, event_registry};

    use crate::event_store::{InMemoryEventStore, ReadRecord};
    use crate::snapshot::InMemorySnapshotStore;

    type Repo = AggregateRepository<Arc<InMemoryEventStore>, Arc<InMemorySnapshotStore>, InventoryItemProjector>;

    fn repository() -> (Repo, Arc<InMemoryEventStore>, Arc<InMemorySnapshotStore>) {
        let store = Arc::new(InMemoryEventStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let repo = AggregateRepository::new(
            store.clone(),
            snapshots.clone(),
            Arc::new(InventoryItemProjector),
            Arc::new(event_registry()),
        );
        (repo, store, snapshots)
    }

    fn uncommitted(keys: &PartitionKeys, after: Option<&SortableUniqueId>, payload: InventoryEvent) -> UncommittedEvent {
        let sid = SortableUniqueId::generate_next(Utc::now(), Uuid::now_v7(), after);
        UncommittedEvent::from_typed(EventId::new(), keys.clone(), sid, EventMetadata::default(), &payload).unwrap()
    }

    async fn seed(repo: &Repo, keys: &PartitionKeys, adjustments: &[i64]) -> Vec<Event<InventoryEvent>> {
        let mut batch = vec![uncommitted(
            keys,
            None,
            InventoryEvent::ItemCreated(ItemCreated {
                name: "bolt".into(),
                warehouse: "main".into(),
            }),
        )];
        for delta in adjustments {
            let prev = batch.last().map(|e| e.sortable_unique_id.clone());
            batch.push(uncommitted(
                keys,
                prev.as_ref(),
                InventoryEvent::StockAdjusted(StockAdjusted { delta: *delta }),
            ));
        }
        repo.save(ExpectedLastId::empty(), batch).await.unwrap()
    }

    #[tokio::test]
    async fn load_without_snapshot_rebuilds() {
        let (repo, _, _) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        let committed = seed(&repo, &keys, &[5, -2]).await;

        let state = repo.load(&keys).await.unwrap();
        assert_eq!(state.version(), 3);
        assert_eq!(state.payload().stock(), 3);
        assert_eq!(state.last_sortable_unique_id(), Some(committed[2].sortable_unique_id()));
    }

    #[tokio::test]
    async fn load_fetches_only_the_delta_after_a_snapshot() {
        let (repo, store, _) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        seed(&repo, &keys, &[5]).await;
        let state = repo.load(&keys).await.unwrap();
        assert!(repo.persist_snapshot(&state).await.unwrap());

        let next = uncommitted(
            &keys,
            state.last_sortable_unique_id(),
            InventoryEvent::StockAdjusted(StockAdjusted { delta: 4 }),
        );
        repo.save(ExpectedLastId::at(state.last_sortable_unique_id().cloned()), vec![next])
            .await
            .unwrap();
        store.clear_read_log();

        let loaded = repo.load(&keys).await.unwrap();
        assert_eq!(loaded.version(), 3);
        assert_eq!(loaded.payload().stock(), 9);
        assert_eq!(
            store.read_log(),
            vec![ReadRecord::Retrieval {
                condition: SortableIdCondition::Since(state.last_sortable_unique_id().cloned().unwrap())
            }]
        );
    }

    #[tokio::test]
    async fn current_snapshot_skips_the_event_read() {
        let (repo, store, _) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        seed(&repo, &keys, &[1, 1]).await;
        let state = repo.load(&keys).await.unwrap();
        repo.persist_snapshot(&state).await.unwrap();
        store.clear_read_log();

        assert_eq!(repo.load(&keys).await.unwrap(), state);
        assert!(store.read_log().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_miss() {
        let (repo, _, snapshots) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        seed(&repo, &keys, &[2]).await;
        snapshots
            .put(&aggregate_key("inventory-item", &keys), b"garbage".to_vec())
            .await
            .unwrap();

        assert_eq!(repo.load(&keys).await.unwrap().version(), 2);
    }

    #[tokio::test]
    async fn version_zero_is_never_persisted() {
        let (repo, _, snapshots) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        let empty = repo.load(&keys).await.unwrap();

        assert!(!repo.persist_snapshot(&empty).await.unwrap());
        assert_eq!(snapshots.write_count(), 0);
    }

    #[tokio::test]
    async fn catch_up_reads_in_chunks() {
        let (repo, store, _) = repository();
        let repo = repo.with_options(&SekibanOptions {
            catch_up_batch_size: 2,
            ..SekibanOptions::default()
        });
        let keys = PartitionKeys::generate("inventory-item");
        seed(&repo, &keys, &[1, 1, 1, 1]).await;
        store.clear_read_log();

        let state = repo.load(&keys).await.unwrap();
        assert_eq!(state.version(), 5);
        assert_eq!(store.read_log().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_failures_are_retried() {
        let (repo, store, _) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        seed(&repo, &keys, &[3]).await;
        store.fail_next_reads(2);

        assert_eq!(repo.load(&keys).await.unwrap().payload().stock(), 3);
    }

    #[tokio::test]
    async fn stale_save_is_a_conflict() {
        let (repo, store, _) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        seed(&repo, &keys, &[]).await;

        let late = uncommitted(&keys, None, InventoryEvent::StockAdjusted(StockAdjusted { delta: 1 }));
        let err = repo.save(ExpectedLastId::empty(), vec![late]).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn unknown_event_type_fails_the_load() {
        let (repo, store, _) = repository();
        let keys = PartitionKeys::generate("inventory-item");
        let committed = seed(&repo, &keys, &[2]).await;

        let mut stray = uncommitted(
            &keys,
            Some(committed[1].sortable_unique_id()),
            InventoryEvent::StockAdjusted(StockAdjusted { delta: 1 }),
        );
        stray.event_type = "Retired".into();
        store
            .write_events(vec![stray], ExpectedLastId::at(Some(committed[1].sortable_unique_id().clone())))
            .await
            .unwrap();

        let err = repo.load(&keys).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Decode(DecodeError::UnknownEventType(ref t)) if t == "Retired"));
    }
}
