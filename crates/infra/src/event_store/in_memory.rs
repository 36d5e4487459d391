use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use sekiban_core::{ExpectedLastId, PartitionKeys, SortableUniqueId};

use super::query::{EventRetrievalInfo, SortableIdCondition};
use super::r#trait::{EventStore, EventStoreError, StoredEvent, TagWriteResult, UncommittedEvent, WriteResult};

#[derive(Debug, Clone)]
struct StreamHead {
    version: u64,
    last_sortable_unique_id: SortableUniqueId,
}

#[derive(Debug, Default)]
struct Inner {
    /// Global log, kept sorted by sortable id.
    log: Vec<StoredEvent>,
    heads: HashMap<String, StreamHead>,
}

/// A read performed against the store, recorded for inspection in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRecord {
    All { since: Option<SortableUniqueId> },
    Tag { tag: String, since: Option<SortableUniqueId> },
    Retrieval { condition: SortableIdCondition },
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance. Besides the store
/// contract it can simulate outages (`fail_next_reads`) and records every
/// read (`read_log`).
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
    failing_reads: AtomicUsize,
    reads: Mutex<Vec<ReadRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` reads fail with [`EventStoreError::Unavailable`].
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn read_log(&self) -> Vec<ReadRecord> {
        self.reads.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn clear_read_log(&self) {
        if let Ok(mut reads) = self.reads.lock() {
            reads.clear();
        }
    }

    pub fn event_count(&self) -> usize {
        self.inner.read().map(|i| i.log.len()).unwrap_or(0)
    }

    fn begin_read(&self, record: ReadRecord) -> Result<(), EventStoreError> {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push(record);
        }
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(EventStoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn snapshot<F>(&self, mut keep: F, max_count: Option<usize>) -> Result<Vec<StoredEvent>, EventStoreError>
    where
        F: FnMut(&StoredEvent) -> bool,
    {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(inner
            .log
            .iter()
            .filter(|e| keep(e))
            .take(max_count.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn validate_batch(events: &[UncommittedEvent]) -> Result<PartitionKeys, EventStoreError> {
        let keys = events[0].partition_keys.clone();
        for (idx, pair) in events.windows(2).enumerate() {
            if pair[1].sortable_unique_id <= pair[0].sortable_unique_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "sortable ids must strictly increase within a batch (index {})",
                    idx + 1
                )));
            }
        }
        for (idx, e) in events.iter().enumerate() {
            if e.partition_keys != keys {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple partitions (index {idx})"
                )));
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn read_all_events(
        &self,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.begin_read(ReadRecord::All {
            since: since.cloned(),
        })?;
        let condition = SortableIdCondition::since(since);
        self.snapshot(|e| condition.matches(&e.sortable_unique_id), None)
    }

    async fn read_events_by_tag(
        &self,
        tag: &str,
        since: Option<&SortableUniqueId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.begin_read(ReadRecord::Tag {
            tag: tag.to_string(),
            since: since.cloned(),
        })?;
        let condition = SortableIdCondition::since(since);
        self.snapshot(
            |e| e.has_tag(tag) && condition.matches(&e.sortable_unique_id),
            None,
        )
    }

    async fn get_events(
        &self,
        info: &EventRetrievalInfo,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.begin_read(ReadRecord::Retrieval {
            condition: info.sortable_id_condition.clone(),
        })?;
        self.snapshot(|e| info.matches(e), info.max_count)
    }

    async fn write_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedLastId,
    ) -> Result<WriteResult, EventStoreError> {
        if events.is_empty() {
            return Ok(WriteResult::default());
        }
        let keys = Self::validate_batch(&events)?;
        let stream_key = keys.stream_key();

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let head = inner.heads.get(&stream_key).cloned();
        let actual = head.as_ref().map(|h| &h.last_sortable_unique_id);
        if !expected.matches(actual) {
            return Err(EventStoreError::Concurrency {
                expected,
                actual: actual.cloned(),
            });
        }
        if let Some(last) = actual {
            if events[0].sortable_unique_id <= *last {
                return Err(EventStoreError::InvalidAppend(format!(
                    "sortable id {} is not after partition head {last}",
                    events[0].sortable_unique_id
                )));
            }
        }

        // Assign versions and append (append-only, kept in global id order).
        let mut next = head.map(|h| h.version).unwrap_or(0) + 1;
        let mut committed = Vec::with_capacity(events.len());
        let mut tags: BTreeMap<String, TagWriteResult> = BTreeMap::new();
        for e in events {
            let stored = e.commit(next);
            next += 1;
            for tag in &stored.tags {
                let entry = tags.entry(tag.clone()).or_insert_with(|| TagWriteResult {
                    tag: tag.clone(),
                    last_sortable_unique_id: stored.sortable_unique_id.clone(),
                    event_count: 0,
                });
                entry.last_sortable_unique_id = stored.sortable_unique_id.clone();
                entry.event_count += 1;
            }
            let at = inner
                .log
                .partition_point(|x| x.sortable_unique_id <= stored.sortable_unique_id);
            inner.log.insert(at, stored.clone());
            committed.push(stored);
        }

        if let Some(last) = committed.last() {
            inner.heads.insert(
                stream_key,
                StreamHead {
                    version: last.version,
                    last_sortable_unique_id: last.sortable_unique_id.clone(),
                },
            );
        }

        Ok(WriteResult {
            events: committed,
            tag_results: tags.into_values().collect(),
            publish_failures: 0,
        })
    }

    async fn last_sortable_unique_id(
        &self,
        partition_keys: &PartitionKeys,
    ) -> Result<Option<SortableUniqueId>, EventStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(inner
            .heads
            .get(&partition_keys.stream_key())
            .map(|h| h.last_sortable_unique_id.clone()))
    }
}
