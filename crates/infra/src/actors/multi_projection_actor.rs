//! Owner of one multi-projection (one projector, one root partition or `*`).
//!
//! ## Activation
//!
//! 1. Restore the safe state from its snapshot, if one exists and was written
//!    by the current projector version (otherwise start from the initial state).
//! 2. Catch up: read every event after the newest received id and feed it to
//!    the safe/unsafe engine in bounded chunks.
//!
//! ## Live path
//!
//! Events delivered by the bus go through [`handle_events`](MultiProjectionActor::handle_events).
//! Deliveries that were already received (redelivery, or an id at or below the
//! safe watermark) are logged and counted, never folded twice.
//!
//! ## Persistence
//!
//! [`on_tick`](MultiProjectionActor::on_tick) re-splits against the clock and
//! persists the **safe** state only, and only when it changed since the last
//! write. A state at version 0 is never written.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use sekiban_core::{Clock, SortableUniqueId};
use sekiban_events::{
    DecodeError, EventTypeRegistry, IngestReport, MultiProjectionState, ProjectionError, Projector,
    SafeUnsafeProjection,
};

use crate::config::SekibanOptions;
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::snapshot::{SnapshotBlob, SnapshotError, SnapshotStore, multi_projection_key};

use super::{ActorLifecycle, TimedActor};

#[derive(Debug, Error)]
pub enum MultiProjectionError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("multi-projection is not active")]
    Inactive,
}

pub struct MultiProjectionActor<S, SS, Pr>
where
    Pr: Projector,
{
    store: S,
    snapshots: SS,
    projector: Arc<Pr>,
    registry: Arc<EventTypeRegistry<Pr::Event>>,
    clock: Arc<dyn Clock>,
    options: SekibanOptions,
    root_partition_key: String,
    engine: Option<SafeUnsafeProjection<Pr>>,
    lifecycle: ActorLifecycle,
    duplicates_reported: u64,
}

impl<S, SS, Pr> core::fmt::Debug for MultiProjectionActor<S, SS, Pr>
where
    Pr: Projector,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MultiProjectionActor")
            .field("projector", &self.projector.name())
            .field("root_partition_key", &self.root_partition_key)
            .field("lifecycle", &self.lifecycle)
            .field("engine", &self.engine)
            .field("duplicates_reported", &self.duplicates_reported)
            .finish()
    }
}

impl<S, SS, Pr> MultiProjectionActor<S, SS, Pr>
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
        clock: Arc<dyn Clock>,
        options: SekibanOptions,
        root_partition_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            snapshots,
            projector,
            registry,
            clock,
            options,
            root_partition_key: root_partition_key.into(),
            engine: None,
            lifecycle: ActorLifecycle::Uninitialized,
            duplicates_reported: 0,
        }
    }

    pub fn lifecycle(&self) -> ActorLifecycle {
        self.lifecycle
    }

    pub fn root_partition_key(&self) -> &str {
        &self.root_partition_key
    }

    /// Live deliveries skipped because they had already been received.
    pub fn duplicates_reported(&self) -> u64 {
        self.duplicates_reported
    }

    pub fn snapshot_key(&self) -> String {
        multi_projection_key(self.projector.name(), &self.root_partition_key)
    }

    /// Restore from snapshot (or start empty) and catch up with the store.
    pub async fn activate(&mut self) -> Result<(), MultiProjectionError> {
        self.lifecycle = ActorLifecycle::Loading;
        let safe_window = self.options.safe_window;
        let engine = match self.restore_snapshot().await {
            Some(safe) => SafeUnsafeProjection::from_safe_state(self.projector.clone(), safe_window, safe),
            None => SafeUnsafeProjection::new(self.projector.clone(), safe_window, self.root_partition_key.clone()),
        };
        self.engine = Some(engine);

        if let Err(err) = self.catch_up().await {
            self.invalidate();
            return Err(err);
        }
        self.lifecycle = ActorLifecycle::Ready;
        info!(
            projector = self.projector.name(),
            root = %self.root_partition_key,
            version = self.engine.as_ref().map(|e| e.state().version()),
            "multi-projection activated"
        );
        Ok(())
    }

    /// Most current state (unsafe if anything is pending, else safe); activates on first use.
    pub async fn current_state(&mut self) -> Result<&MultiProjectionState<Pr::Payload>, MultiProjectionError> {
        self.ensure_active().await?;
        self.state().ok_or(MultiProjectionError::Inactive)
    }

    /// State of an active actor, without triggering activation.
    pub fn state(&self) -> Option<&MultiProjectionState<Pr::Payload>> {
        self.engine.as_ref().map(|e| e.state())
    }

    pub fn safe_state(&self) -> Option<&MultiProjectionState<Pr::Payload>> {
        self.engine.as_ref().map(|e| e.safe_state())
    }

    pub fn unsafe_state(&self) -> Option<&MultiProjectionState<Pr::Payload>> {
        self.engine.as_ref().and_then(|e| e.unsafe_state())
    }

    /// Run a read-only query against the current payload.
    pub async fn query<R, F>(&mut self, f: F) -> Result<R, MultiProjectionError>
    where
        F: FnOnce(&Pr::Payload) -> R,
    {
        let state = self.current_state().await?;
        Ok(f(state.payload()))
    }

    /// Whether `id` has been received (buffered or folded), for read-your-writes waits.
    pub fn is_sortable_unique_id_received(&self, id: &SortableUniqueId) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_received(id))
    }

    /// Live path: fold newly published events, skipping already received ones.
    ///
    /// A batch that fails to decode or ingest resets the actor without persisting,
    /// so the next call re-activates from the store instead of folding around the gap.
    pub async fn handle_events(&mut self, stored: Vec<StoredEvent>) -> Result<IngestReport, MultiProjectionError> {
        let projector = self.projector.name();
        self.ensure_active().await?;
        let now = self.clock.now();
        let engine = self.engine.as_mut().ok_or(MultiProjectionError::Inactive)?;

        let mut fresh = Vec::with_capacity(stored.len());
        let mut duplicates = 0;
        for event in stored {
            if engine.is_received(&event.sortable_unique_id) {
                warn!(
                    projector,
                    event_id = %event.id,
                    sortable_unique_id = %event.sortable_unique_id,
                    "duplicate event delivery reported and skipped"
                );
                duplicates += 1;
                continue;
            }
            fresh.push(event);
        }

        let outcome = match self.registry.decode_all(&fresh) {
            Ok(events) => engine.ingest(events, now).map_err(MultiProjectionError::from),
            Err(err) => Err(err.into()),
        };
        match outcome {
            Ok(report) => {
                self.duplicates_reported += duplicates;
                Ok(report)
            }
            Err(err) => {
                warn!(projector, error = %err, "live batch rejected, projection reset for catch-up");
                self.invalidate();
                Err(err)
            }
        }
    }

    /// Discard both states and replay everything from the store.
    pub async fn rebuild(&mut self) -> Result<(), MultiProjectionError> {
        let Some(engine) = self.engine.as_mut() else {
            return self.activate().await;
        };
        engine.reset();
        info!(projector = self.projector.name(), root = %self.root_partition_key, "multi-projection rebuild requested");
        self.lifecycle = ActorLifecycle::Loading;
        if let Err(err) = self.catch_up().await {
            self.invalidate();
            return Err(err);
        }
        self.lifecycle = ActorLifecycle::Ready;
        Ok(())
    }

    /// Drop the in-memory states without persisting them.
    fn invalidate(&mut self) {
        self.engine = None;
        self.lifecycle = ActorLifecycle::Uninitialized;
    }

    async fn ensure_active(&mut self) -> Result<(), MultiProjectionError> {
        if self.engine.is_none() {
            self.activate().await?;
        }
        Ok(())
    }

    /// Read everything after the newest received id and ingest it in chunks.
    async fn catch_up(&mut self) -> Result<(), MultiProjectionError> {
        let since = self
            .engine
            .as_ref()
            .and_then(|e| e.last_received_id().cloned());
        let store = &self.store;
        let since_ref = since.as_ref();
        let stored = self
            .options
            .retry
            .retry_transient("read_all_events", move || store.read_all_events(since_ref))
            .await?;

        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let batch = self.options.catch_up_batch_size.max(1);
        let mut ingested = 0;
        for chunk in stored.chunks(batch) {
            let events = self.registry.decode_all(chunk)?;
            let report = engine.ingest(events, self.clock.now())?;
            ingested += report.accepted;
        }
        debug!(projector = self.projector.name(), ingested, pending = engine.pending(), "catch-up complete");
        Ok(())
    }

    async fn restore_snapshot(&self) -> Option<MultiProjectionState<Pr::Payload>> {
        let key = self.snapshot_key();
        let bytes = match self.snapshots.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(projector = self.projector.name(), error = %err, "snapshot store read failed, rebuilding");
                return None;
            }
        };
        match SnapshotBlob::decode(&bytes).and_then(|blob| blob.into_multi_projection(self.projector.as_ref())) {
            Ok(state) if state.root_partition_key() == self.root_partition_key => {
                debug!(projector = self.projector.name(), version = state.version(), "multi-projection snapshot restored");
                Some(state)
            }
            Ok(state) => {
                warn!(
                    projector = self.projector.name(),
                    expected = %self.root_partition_key,
                    found = %state.root_partition_key(),
                    "snapshot of another root partition ignored"
                );
                None
            }
            Err(SnapshotError::ProjectorMismatch { expected, found }) => {
                info!(projector = self.projector.name(), %expected, %found, "projector version changed, rebuilding multi-projection");
                None
            }
            Err(err) => {
                warn!(projector = self.projector.name(), error = %err, "corrupt multi-projection snapshot treated as a miss");
                None
            }
        }
    }

    async fn persist_if_dirty(&mut self) -> Result<bool, MultiProjectionError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(false);
        };
        if !engine.is_dirty() || engine.safe_state().version() == 0 {
            debug!(projector = self.projector.name(), "persist skipped, safe state unchanged");
            return Ok(false);
        }
        let bytes = SnapshotBlob::from_multi_projection(engine.safe_state())?.encode()?;
        let key = multi_projection_key(self.projector.name(), &self.root_partition_key);
        self.snapshots.put(&key, bytes).await?;
        engine.mark_persisted();
        debug!(projector = self.projector.name(), version = engine.safe_state().version(), "multi-projection snapshot persisted");
        Ok(true)
    }
}

#[async_trait]
impl<S, SS, Pr> TimedActor for MultiProjectionActor<S, SS, Pr>
where
    S: EventStore + 'static,
    SS: SnapshotStore + 'static,
    Pr: Projector,
{
    type Error = MultiProjectionError;

    fn name(&self) -> &str {
        self.projector.name()
    }

    /// Re-split against the clock, then persist the safe state if it changed.
    async fn on_tick(&mut self) -> Result<bool, MultiProjectionError> {
        let now = self.clock.now();
        if let Some(engine) = self.engine.as_mut() {
            engine.advance(now)?;
        }
        self.persist_if_dirty().await
    }

    async fn deactivate(&mut self) -> Result<(), MultiProjectionError> {
        self.on_tick().await?;
        self.engine = None;
        self.lifecycle = ActorLifecycle::Uninitialized;
        info!(projector = self.projector.name(), root = %self.root_partition_key, "multi-projection deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use uuid::Uuid;

    use sekiban_core::{AggregateId, EventId, ExpectedLastId, ManualClock, PartitionKeys};
    use sekiban_events::{ALL_ROOT_PARTITIONS, EventMetadata};
    use sekiban_inventory::{InventoryEvent, ItemCreated, StockAdjusted, StockTotalsProjector, event_registry};

    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use crate::snapshot::InMemorySnapshotStore;

    type Actor = MultiProjectionActor<Arc<InMemoryEventStore>, Arc<InMemorySnapshotStore>, StockTotalsProjector>;

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryEventStore::new()),
                snapshots: Arc::new(InMemorySnapshotStore::new()),
                clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap())),
            }
        }

        fn actor(&self, root: &str) -> Actor {
            MultiProjectionActor::new(
                self.store.clone(),
                self.snapshots.clone(),
                Arc::new(StockTotalsProjector),
                Arc::new(event_registry()),
                self.clock.clone(),
                SekibanOptions::default(),
                root,
            )
        }

        /// Create an item with an initial adjustment, `age_secs` before now.
        async fn item(&self, keys: &PartitionKeys, delta: i64, age_secs: i64) -> Vec<StoredEvent> {
            let at = self.clock.now() - TimeDelta::seconds(age_secs);
            let first = SortableUniqueId::generate(at, Uuid::now_v7());
            let second = SortableUniqueId::generate_next(at, Uuid::now_v7(), Some(&first));
            let events = vec![
                UncommittedEvent::from_typed(
                    EventId::new(),
                    keys.clone(),
                    first,
                    EventMetadata::default(),
                    &InventoryEvent::ItemCreated(ItemCreated {
                        name: "bolt".into(),
                        warehouse: "main".into(),
                    }),
                )
                .unwrap(),
                UncommittedEvent::from_typed(
                    EventId::new(),
                    keys.clone(),
                    second,
                    EventMetadata::default(),
                    &InventoryEvent::StockAdjusted(StockAdjusted { delta }),
                )
                .unwrap(),
            ];
            self.store.write_events(events, ExpectedLastId::empty()).await.unwrap().events
        }
    }

    /// A committed event whose type no registry knows.
    async fn unregistered(store: &InMemoryEventStore, keys: &PartitionKeys, at: chrono::DateTime<Utc>) -> Vec<StoredEvent> {
        let mut event = UncommittedEvent::from_typed(
            EventId::new(),
            keys.clone(),
            SortableUniqueId::generate(at, Uuid::now_v7()),
            EventMetadata::default(),
            &InventoryEvent::StockAdjusted(StockAdjusted { delta: 1 }),
        )
        .unwrap();
        event.event_type = "Bogus".into();
        store.write_events(vec![event], ExpectedLastId::empty()).await.unwrap().events
    }

    fn item_keys() -> PartitionKeys {
        PartitionKeys::existing(AggregateId::new(), "inventory-item")
    }

    #[tokio::test]
    async fn activation_catches_up_and_splits() {
        let fx = Fixture::new();
        fx.item(&item_keys(), 5, 60).await;
        fx.item(&item_keys(), 3, 1).await;

        let mut actor = fx.actor(ALL_ROOT_PARTITIONS);
        let state = actor.current_state().await.unwrap();
        assert_eq!(state.version(), 4);
        assert_eq!(state.payload().total(), 8);
        assert_eq!(actor.safe_state().unwrap().version(), 2);
        assert_eq!(actor.lifecycle(), ActorLifecycle::Ready);
    }

    #[tokio::test]
    async fn redelivered_events_are_counted_not_folded() {
        let fx = Fixture::new();
        let mut actor = fx.actor(ALL_ROOT_PARTITIONS);
        actor.activate().await.unwrap();

        let written = fx.item(&item_keys(), 2, 0).await;
        actor.handle_events(written.clone()).await.unwrap();
        actor.handle_events(written.clone()).await.unwrap();

        assert_eq!(actor.duplicates_reported(), 2);
        assert_eq!(actor.state().unwrap().version(), 2);
        assert!(actor.is_sortable_unique_id_received(&written[1].sortable_unique_id));
    }

    #[tokio::test]
    async fn persists_safe_state_once_per_change() {
        let fx = Fixture::new();
        fx.item(&item_keys(), 4, 60).await;
        let mut actor = fx.actor(ALL_ROOT_PARTITIONS);
        actor.activate().await.unwrap();

        assert!(actor.on_tick().await.unwrap());
        assert!(!actor.on_tick().await.unwrap());
        assert_eq!(fx.snapshots.write_count(), 1);

        let mut restarted = fx.actor(ALL_ROOT_PARTITIONS);
        let state = restarted.current_state().await.unwrap();
        assert_eq!(state.version(), 2);
        assert_eq!(state.applied_snapshot_version(), 2);
    }

    #[tokio::test]
    async fn root_partition_filter_excludes_other_tenants() {
        let fx = Fixture::new();
        fx.item(&item_keys().with_root_partition_key("tenant-a"), 1, 60).await;
        fx.item(&item_keys().with_root_partition_key("tenant-b"), 9, 60).await;

        let mut tenant_a = fx.actor("tenant-a");
        let total = tenant_a.query(|totals| totals.total()).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn rebuild_reproduces_the_safe_state() {
        let fx = Fixture::new();
        fx.item(&item_keys(), 4, 60).await;
        fx.item(&item_keys(), 6, 30).await;
        let mut actor = fx.actor(ALL_ROOT_PARTITIONS);
        actor.activate().await.unwrap();
        let before = actor.safe_state().unwrap().clone();

        actor.rebuild().await.unwrap();
        assert_eq!(actor.safe_state().unwrap(), &before);
    }

    #[tokio::test]
    async fn activation_with_an_unknown_event_type_fails_and_stays_inactive() {
        let fx = Fixture::new();
        fx.item(&item_keys(), 4, 60).await;
        unregistered(&fx.store, &item_keys(), fx.clock.now()).await;

        let mut actor = fx.actor(ALL_ROOT_PARTITIONS);
        let err = actor.activate().await.unwrap_err();

        assert!(matches!(err, MultiProjectionError::Decode(DecodeError::UnknownEventType(ref t)) if t == "Bogus"));
        assert!(actor.state().is_none());
        assert_eq!(actor.lifecycle(), ActorLifecycle::Uninitialized);
    }

    #[tokio::test]
    async fn rejected_live_batch_drops_the_engine_without_persisting() {
        let fx = Fixture::new();
        fx.item(&item_keys(), 4, 60).await;
        let mut actor = fx.actor(ALL_ROOT_PARTITIONS);
        actor.activate().await.unwrap();

        let mut batch = fx.item(&item_keys(), 3, 0).await;
        batch.extend(unregistered(&fx.store, &item_keys(), fx.clock.now()).await);
        assert!(actor.handle_events(batch).await.is_err());

        assert!(actor.state().is_none());
        assert_eq!(actor.lifecycle(), ActorLifecycle::Uninitialized);
        assert!(!actor.on_tick().await.unwrap());
        assert_eq!(fx.snapshots.write_count(), 0);
        assert!(matches!(actor.current_state().await, Err(MultiProjectionError::Decode(_))));
    }
}
