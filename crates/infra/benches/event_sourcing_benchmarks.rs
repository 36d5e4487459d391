use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use sekiban_core::{AggregateId, EventId, ExpectedLastId, ManualClock, PartitionKeys, SortableUniqueId};
use sekiban_events::{
    ALL_ROOT_PARTITIONS, Event, EventMetadata, MultiProjectionState, ProjectionRunner, SafeUnsafeProjection,
};
use sekiban_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use sekiban_infra::snapshot::{InMemorySnapshotStore, SnapshotBlob};
use sekiban_infra::{AggregateRepository, CommandExecutor};
use sekiban_inventory::{
    ITEM_GROUP, InventoryCommand, InventoryEvent, InventoryItemProjector, ItemCreated, StockAdjusted,
    StockTotalsProjector, command_handlers, event_registry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use uuid::Uuid;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime")
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// One item per `items`, each created and adjusted `per_item - 1` times, one second apart.
fn history(items: usize, per_item: usize) -> Vec<Event<InventoryEvent>> {
    let mut events = Vec::with_capacity(items * per_item);
    let mut last: Option<SortableUniqueId> = None;
    let mut tick = 0i64;
    for _ in 0..items {
        let keys = PartitionKeys::generate(ITEM_GROUP);
        for version in 1..=per_item {
            let payload = if version == 1 {
                InventoryEvent::ItemCreated(ItemCreated {
                    name: "Test Item".to_string(),
                    warehouse: "main".to_string(),
                })
            } else {
                InventoryEvent::StockAdjusted(StockAdjusted {
                    delta: (version % 10) as i64,
                })
            };
            let at = start() + TimeDelta::seconds(tick);
            let sid = SortableUniqueId::generate_next(at, Uuid::now_v7(), last.as_ref());
            last = Some(sid.clone());
            tick += 1;
            events.push(Event::new(
                EventId::new(),
                payload,
                keys.clone(),
                sid,
                version as u64,
                EventMetadata::default(),
            ));
        }
    }
    events.sort_by(|a, b| a.sortable_unique_id().cmp(b.sortable_unique_id()));
    events
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    let rt = runtime();
    let clock = Arc::new(ManualClock::new(start()));
    let executor = CommandExecutor::new(
        Arc::new(AggregateRepository::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InventoryItemProjector),
            Arc::new(event_registry()),
        )),
        Arc::new(command_handlers()),
        clock,
    );
    let metadata = EventMetadata::default();

    group.bench_function("create_item_fresh", |b| {
        b.iter(|| {
            let item = AggregateId::new();
            rt.block_on(executor.execute(black_box(&InventoryCommand::create(item, "bolt", "main")), &metadata))
                .unwrap();
        });
    });

    let item = AggregateId::new();
    rt.block_on(executor.execute(&InventoryCommand::create(item, "bolt", "main"), &metadata))
        .unwrap();
    for _ in 0..100 {
        rt.block_on(executor.execute(&InventoryCommand::adjust(item, 1), &metadata))
            .unwrap();
    }
    group.bench_function("adjust_stock_with_history", |b| {
        b.iter(|| {
            rt.block_on(executor.execute(black_box(&InventoryCommand::adjust(item, 1)), &metadata))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");
    let rt = runtime();

    for batch_size in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::new("write_events", batch_size), batch_size, |b, &size| {
            let store = InMemoryEventStore::new();
            b.iter(|| {
                let keys = PartitionKeys::generate(ITEM_GROUP);
                let mut last: Option<SortableUniqueId> = None;
                let batch: Vec<_> = (0..size)
                    .map(|i| {
                        let sid = SortableUniqueId::generate_next(Utc::now(), Uuid::now_v7(), last.as_ref());
                        last = Some(sid.clone());
                        UncommittedEvent::from_typed(
                            EventId::new(),
                            keys.clone(),
                            sid,
                            EventMetadata::default(),
                            &InventoryEvent::StockAdjusted(StockAdjusted { delta: i as i64 + 1 }),
                        )
                        .unwrap()
                    })
                    .collect();
                rt.block_on(store.write_events(black_box(batch), ExpectedLastId::empty()))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");
    let projector = InventoryItemProjector;

    for event_count in [10usize, 100, 1000, 10000].iter() {
        let events = history(1, *event_count);
        let keys = events[0].partition_keys().clone();
        group.throughput(Throughput::Elements(*event_count as u64));
        group.bench_with_input(BenchmarkId::new("rebuild_from_events", event_count), &events, |b, events| {
            b.iter(|| {
                ProjectionRunner::rebuild_from_scratch(&projector, keys.clone(), black_box(events.iter())).unwrap()
            });
        });
    }

    group.finish();
}

/// The same history ingested one event per call and as a single batch.
///
/// Both paths end in the same safe/unsafe pair; the difference is how often the
/// unsafe state is recomputed.
fn bench_safe_unsafe_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("safe_unsafe_ingest");
    let projector = Arc::new(StockTotalsProjector);
    let events = history(50, 20);
    // Border lands in the middle of the history: half safe, half pending.
    let now = start() + TimeDelta::seconds(events.len() as i64 / 2 + 7);
    let window = Duration::from_secs(7);
    group.throughput(Throughput::Elements(events.len() as u64));

    group.bench_function("one_at_a_time", |b| {
        b.iter(|| {
            let mut engine = SafeUnsafeProjection::new(projector.clone(), window, ALL_ROOT_PARTITIONS);
            for event in events.iter().cloned() {
                engine.ingest(vec![event], now).unwrap();
            }
            black_box(engine.state().version())
        });
    });

    group.bench_function("batched", |b| {
        b.iter(|| {
            let mut engine = SafeUnsafeProjection::new(projector.clone(), window, ALL_ROOT_PARTITIONS);
            engine.ingest(black_box(events.clone()), now).unwrap();
            black_box(engine.state().version())
        });
    });

    group.finish();
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_encode");
    let projector = StockTotalsProjector;
    let mut state = MultiProjectionState::initial(&projector, ALL_ROOT_PARTITIONS);
    for event in history(1000, 2).iter() {
        state.apply(&projector, event).unwrap();
    }

    group.bench_function("compress_and_encode", |b| {
        b.iter(|| SnapshotBlob::from_multi_projection(black_box(&state)).unwrap().encode().unwrap());
    });

    let bytes = SnapshotBlob::from_multi_projection(&state).unwrap().encode().unwrap();
    group.bench_function("decode_and_restore", |b| {
        b.iter(|| {
            SnapshotBlob::decode(black_box(&bytes))
                .unwrap()
                .into_multi_projection(&projector)
                .unwrap()
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_projection_rebuild_speed,
    bench_safe_unsafe_ingest,
    bench_snapshot_encode
);
criterion_main!(benches);
