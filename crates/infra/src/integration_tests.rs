//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → MultiProjection / Aggregate → Snapshot
//!
//! Verifies:
//! - Appends are ordered and conditional on the last sortable id
//! - The safe/unsafe split follows the injected clock
//! - Snapshots are written only when something changed, and stale ones are rebuilt
//! - Live delivery gives read-your-writes through `is_sortable_unique_id_received`

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone, Utc};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use sekiban_core::{AggregateId, Clock, EventId, ExpectedLastId, ManualClock, PartitionKeys, SortableUniqueId};
    use sekiban_events::{ALL_ROOT_PARTITIONS, EventMetadata, InMemoryEventBus};
    use sekiban_inventory::{
        ITEM_GROUP, InventoryCommand, InventoryEvent, InventoryItemProjector, ItemCreated, StockAdjusted,
        StockTotalsProjector, command_handlers, event_registry,
    };

    use crate::actors::{MultiProjectionActor, TimedActor};
    use crate::command_executor::CommandExecutor;
    use crate::config::SekibanOptions;
    use crate::event_store::{
        EventStore, InMemoryEventStore, PublishingEventStore, ReadRecord, SortableIdCondition, StoredEvent,
        UncommittedEvent,
    };
    use crate::repository::AggregateRepository;
    use crate::snapshot::{InMemorySnapshotStore, SnapshotBlob, SnapshotStore, aggregate_key};
    use crate::workers::spawn_multi_projection_worker;

    type Totals = MultiProjectionActor<Arc<InMemoryEventStore>, Arc<InMemorySnapshotStore>, StockTotalsProjector>;

    struct Harness {
        store: Arc<InMemoryEventStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            sekiban_observability::init();
            Self {
                store: Arc::new(InMemoryEventStore::new()),
                snapshots: Arc::new(InMemorySnapshotStore::new()),
                clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap())),
            }
        }

        fn totals(&self) -> Totals {
            MultiProjectionActor::new(
                self.store.clone(),
                self.snapshots.clone(),
                Arc::new(StockTotalsProjector),
                Arc::new(event_registry()),
                self.clock.clone(),
                SekibanOptions::default(),
                ALL_ROOT_PARTITIONS,
            )
        }

        /// Append `payloads` to `keys`, all stamped `age_secs` before now.
        async fn append(&self, keys: &PartitionKeys, age_secs: i64, payloads: Vec<InventoryEvent>) -> Vec<StoredEvent> {
            let at = self.clock.now() - TimeDelta::seconds(age_secs);
            let head = self.store.last_sortable_unique_id(keys).await.unwrap();
            let mut previous = head.clone();
            let mut batch = Vec::new();
            for payload in payloads {
                let sid = SortableUniqueId::generate_next(at, Uuid::now_v7(), previous.as_ref());
                previous = Some(sid.clone());
                batch.push(
                    UncommittedEvent::from_typed(EventId::new(), keys.clone(), sid, EventMetadata::default(), &payload)
                        .unwrap(),
                );
            }
            self.store.write_events(batch, ExpectedLastId::at(head)).await.unwrap().events
        }
    }

    fn created() -> InventoryEvent {
        InventoryEvent::ItemCreated(ItemCreated {
            name: "bolt".into(),
            warehouse: "main".into(),
        })
    }

    fn adjusted(delta: i64) -> InventoryEvent {
        InventoryEvent::StockAdjusted(StockAdjusted { delta })
    }

    #[tokio::test]
    async fn appends_are_versioned_in_order() {
        let h = Harness::new();
        let keys = PartitionKeys::generate(ITEM_GROUP);

        let written = h.append(&keys, 0, vec![created(), adjusted(2), adjusted(3)]).await;

        assert_eq!(written.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(
            h.store.last_sortable_unique_id(&keys).await.unwrap().as_ref(),
            Some(&written[2].sortable_unique_id)
        );
    }

    #[tokio::test]
    async fn stale_expectation_commits_nothing() {
        let h = Harness::new();
        let keys = PartitionKeys::generate(ITEM_GROUP);
        h.append(&keys, 0, vec![created()]).await;

        let late = UncommittedEvent::from_typed(
            EventId::new(),
            keys.clone(),
            SortableUniqueId::generate(h.clock.now(), Uuid::now_v7()),
            EventMetadata::default(),
            &adjusted(1),
        )
        .unwrap();
        let err = h.store.write_events(vec![late], ExpectedLastId::empty()).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(h.store.event_count(), 1);
    }

    #[tokio::test]
    async fn split_follows_the_clock_and_persists_once() {
        let h = Harness::new();
        let keys = PartitionKeys::generate(ITEM_GROUP);
        h.append(&keys, 60, vec![created(), adjusted(1), adjusted(1)]).await;
        h.append(&keys, 1, vec![adjusted(1), adjusted(1)]).await;

        let mut totals = h.totals();
        totals.activate().await.unwrap();
        assert_eq!(totals.safe_state().unwrap().version(), 3);
        assert_eq!(totals.unsafe_state().map(|s| s.version()), Some(5));
        assert_eq!(totals.state().unwrap().payload().total(), 4);

        h.clock.advance(TimeDelta::seconds(10));
        assert!(totals.on_tick().await.unwrap());
        assert_eq!(totals.safe_state().unwrap().version(), 5);
        assert!(totals.unsafe_state().is_none());
        assert_eq!(h.snapshots.write_count(), 1);

        assert!(!totals.on_tick().await.unwrap());
        assert_eq!(h.snapshots.write_count(), 1);
    }

    #[tokio::test]
    async fn stale_projector_version_forces_full_aggregate_rebuild() {
        let h = Harness::new();
        let repository = AggregateRepository::new(
            h.store.clone(),
            h.snapshots.clone(),
            Arc::new(InventoryItemProjector),
            Arc::new(event_registry()),
        );
        let keys = PartitionKeys::generate(ITEM_GROUP);
        h.append(&keys, 0, vec![created(), adjusted(4)]).await;
        let state = repository.load(&keys).await.unwrap();
        assert!(repository.persist_snapshot(&state).await.unwrap());

        let key = aggregate_key("inventory-item", &keys);
        let mut blob = SnapshotBlob::decode(&h.snapshots.get(&key).await.unwrap().unwrap()).unwrap();
        blob.payload_version = "0".into();
        h.snapshots.put(&key, blob.encode().unwrap()).await.unwrap();
        h.store.clear_read_log();

        let reloaded = repository.load(&keys).await.unwrap();
        assert_eq!(reloaded, state);
        assert_eq!(
            h.store.read_log(),
            vec![ReadRecord::Retrieval {
                condition: SortableIdCondition::None
            }]
        );
    }

    #[tokio::test]
    async fn stale_projector_version_forces_full_multi_projection_replay() {
        let h = Harness::new();
        h.append(&PartitionKeys::generate(ITEM_GROUP), 60, vec![created(), adjusted(3)]).await;
        let mut first = h.totals();
        first.activate().await.unwrap();
        assert!(first.on_tick().await.unwrap());

        let key = first.snapshot_key();
        let mut blob = SnapshotBlob::decode(&h.snapshots.get(&key).await.unwrap().unwrap()).unwrap();
        blob.payload_version = "0".into();
        h.snapshots.put(&key, blob.encode().unwrap()).await.unwrap();
        h.store.clear_read_log();

        let mut second = h.totals();
        let state = second.current_state().await.unwrap();
        assert_eq!(state.version(), 2);
        assert_eq!(state.applied_snapshot_version(), 0);
        assert_eq!(h.store.read_log(), vec![ReadRecord::All { since: None }]);
    }

    #[tokio::test]
    async fn activation_survives_transient_read_failures() {
        let h = Harness::new();
        h.append(&PartitionKeys::generate(ITEM_GROUP), 60, vec![created(), adjusted(5)]).await;
        h.store.fail_next_reads(2);

        let mut totals = h.totals();
        let total = totals.query(|t| t.total()).await.unwrap();

        assert_eq!(total, 5);
        assert_eq!(h.store.read_log().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn live_delivery_gives_read_your_writes() {
        sekiban_observability::init();
        let bus = Arc::new(InMemoryEventBus::<StoredEvent>::new());
        let store = Arc::new(PublishingEventStore::new(InMemoryEventStore::new(), bus.clone()));
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()));

        let totals = Arc::new(Mutex::new(MultiProjectionActor::new(
            store.clone(),
            snapshots.clone(),
            Arc::new(StockTotalsProjector),
            Arc::new(event_registry()),
            clock.clone(),
            SekibanOptions::default(),
            ALL_ROOT_PARTITIONS,
        )));
        let worker = spawn_multi_projection_worker(totals.clone(), &bus, Duration::from_secs(300));

        let repository = AggregateRepository::new(
            store.clone(),
            snapshots.clone(),
            Arc::new(InventoryItemProjector),
            Arc::new(event_registry()),
        );
        let executor = CommandExecutor::new(Arc::new(repository), Arc::new(command_handlers()), clock.clone());
        let item = AggregateId::new();
        let metadata = EventMetadata::default();
        executor.execute(&InventoryCommand::create(item, "nut", "east"), &metadata).await.unwrap();
        let response = executor.execute(&InventoryCommand::adjust(item, 9), &metadata).await.unwrap();
        let written = response.events[0].sortable_unique_id().clone();

        let mut received = false;
        for _ in 0..50 {
            if totals.lock().await.is_sortable_unique_id_received(&written) {
                received = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(received);
        assert_eq!(totals.lock().await.state().map(|s| s.payload().total()), Some(9));
        assert_eq!(response.version, 2);

        worker.shutdown().await;
    }
}
