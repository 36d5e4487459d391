//! Safe/unsafe split projection engine.
//!
//! Events younger than a trailing *safe window* may still be joined by
//! late-arriving events with earlier ids (clock skew between writers, in-flight
//! appends). The engine therefore keeps two states:
//!
//! - **safe**: folded only from events at or below the safe border
//!   (`now - safe_window`). It never has to be rolled back, so it is the only
//!   state that is ever persisted.
//! - **unsafe**: the safe state plus every buffered event above the border,
//!   recomputed from the safe state on every update (never extended in place).
//!   Absent when nothing is buffered.
//!
//! ```text
//!          safe border (monotonic)
//!               │
//!   ... e1 e2 e3│ e4 e5      buffer = [e4, e5]
//!   └─ safe ───┘│
//!   └────── unsafe ───┘
//! ```
//!
//! The engine is a pure state machine: callers pass `now` explicitly and own
//! all IO (catch-up reads, snapshot writes). Chunking a sequence differently
//! yields the same final pair of states.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use sekiban_core::SortableUniqueId;

use crate::event::Event;
use crate::projector::Projector;
use crate::runner::ProjectionError;
use crate::state::MultiProjectionState;

/// Outcome of one [`SafeUnsafeProjection::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Events taken into the buffer or the safe state.
    pub accepted: usize,
    /// Events outside this projection's root partition.
    pub skipped: usize,
    /// Events folded into the safe state by this call.
    pub promoted: usize,
    /// Events still waiting above the safe border.
    pub pending: usize,
}

pub struct SafeUnsafeProjection<Pr>
where
    Pr: Projector,
{
    projector: Arc<Pr>,
    safe_window: Duration,
    safe: MultiProjectionState<Pr::Payload>,
    unsafe_state: Option<MultiProjectionState<Pr::Payload>>,
    /// Sorted by sortable id; every entry is above `border`.
    buffer: Vec<Event<Pr::Event>>,
    border: Option<SortableUniqueId>,
    dirty: bool,
}

impl<Pr> core::fmt::Debug for SafeUnsafeProjection<Pr>
where
    Pr: Projector,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SafeUnsafeProjection")
            .field("projector", &self.projector.name())
            .field("safe_window", &self.safe_window)
            .field("safe_version", &self.safe.version())
            .field("unsafe_version", &self.unsafe_state.as_ref().map(|s| s.version()))
            .field("pending", &self.buffer.len())
            .field("border", &self.border)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl<Pr> SafeUnsafeProjection<Pr>
where
    Pr: Projector,
{
    pub fn new(projector: Arc<Pr>, safe_window: Duration, root_partition_key: impl Into<String>) -> Self {
        let safe = MultiProjectionState::initial(projector.as_ref(), root_partition_key);
        Self::from_safe_state(projector, safe_window, safe)
    }

    /// Resume from a previously persisted safe state.
    pub fn from_safe_state(
        projector: Arc<Pr>,
        safe_window: Duration,
        safe: MultiProjectionState<Pr::Payload>,
    ) -> Self {
        Self {
            projector,
            safe_window,
            safe,
            unsafe_state: None,
            buffer: Vec::new(),
            border: None,
            dirty: false,
        }
    }

    pub fn projector(&self) -> &Pr {
        &self.projector
    }

    pub fn safe_window(&self) -> Duration {
        self.safe_window
    }

    /// Most current view: the unsafe state if any events are pending, else the safe state.
    pub fn state(&self) -> &MultiProjectionState<Pr::Payload> {
        self.unsafe_state.as_ref().unwrap_or(&self.safe)
    }

    pub fn safe_state(&self) -> &MultiProjectionState<Pr::Payload> {
        &self.safe
    }

    pub fn unsafe_state(&self) -> Option<&MultiProjectionState<Pr::Payload>> {
        self.unsafe_state.as_ref()
    }

    /// Highest border used so far. Never moves backwards.
    pub fn safe_border(&self) -> Option<&SortableUniqueId> {
        self.border.as_ref()
    }

    /// Number of events above the safe border.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Safe state changed since the last [`mark_persisted`](Self::mark_persisted).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_persisted(&mut self) {
        self.dirty = false;
    }

    /// Newest id this projection has seen (buffered or folded into safe).
    pub fn last_received_id(&self) -> Option<&SortableUniqueId> {
        self.buffer
            .last()
            .map(|e| e.sortable_unique_id())
            .or_else(|| self.safe.last_sortable_unique_id())
    }

    /// Whether `id` is buffered or at/below the safe watermark.
    pub fn is_received(&self, id: &SortableUniqueId) -> bool {
        if let Some(watermark) = self.safe.last_sortable_unique_id() {
            if id <= watermark {
                return true;
            }
        }
        self.buffer
            .binary_search_by(|e| e.sortable_unique_id().cmp(id))
            .is_ok()
    }

    /// Take a batch of new events and re-split at the current safe border.
    ///
    /// The whole batch is validated before anything changes: an event at or
    /// below the safe watermark, or one whose id collides with a buffered event,
    /// rejects the batch and leaves the engine untouched.
    pub fn ingest(
        &mut self,
        events: Vec<Event<Pr::Event>>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, ProjectionError> {
        let total = events.len();
        let incoming: Vec<_> = events
            .into_iter()
            .filter(|e| self.safe.accepts(e.partition_keys()))
            .collect();
        let skipped = total - incoming.len();
        self.check_incoming(&incoming)?;
        let accepted = incoming.len();

        let mut buffer = self.buffer.clone();
        if !incoming.is_empty() {
            buffer.extend(incoming);
            buffer.sort_by(|a, b| a.sortable_unique_id().cmp(b.sortable_unique_id()));
        }

        let border = self.next_border(now);
        let split = buffer.partition_point(|e| e.sortable_unique_id() <= &border);
        let pending = buffer.split_off(split);

        let promoted_state = self.fold(&self.safe, &buffer)?;
        let base = promoted_state.as_ref().unwrap_or(&self.safe);
        let unsafe_state = self.fold(base, &pending)?;

        let promoted = buffer.len();
        if let Some(next) = promoted_state {
            self.safe = next;
            self.dirty = true;
        }
        self.unsafe_state = unsafe_state;
        self.buffer = pending;
        self.border = Some(border);

        Ok(IngestReport {
            accepted,
            skipped,
            promoted,
            pending: self.buffer.len(),
        })
    }

    /// No-op update: re-split the buffer against `now` without new events.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<IngestReport, ProjectionError> {
        self.ingest(Vec::new(), now)
    }

    /// Discard both states and the buffer, ready for a replay from the store.
    ///
    /// The border is kept: events already classified safe stay safe.
    pub fn reset(&mut self) {
        let root = self.safe.root_partition_key().to_string();
        self.safe = MultiProjectionState::initial(self.projector.as_ref(), root);
        self.unsafe_state = None;
        self.buffer.clear();
        self.dirty = false;
    }

    fn next_border(&self, now: DateTime<Utc>) -> SortableUniqueId {
        let computed = SortableUniqueId::safe_border(now, self.safe_window);
        match &self.border {
            Some(previous) if *previous > computed => previous.clone(),
            _ => computed,
        }
    }

    /// Fold `events` on top of a copy of `base`; `None` when there is nothing to fold.
    fn fold(
        &self,
        base: &MultiProjectionState<Pr::Payload>,
        events: &[Event<Pr::Event>],
    ) -> Result<Option<MultiProjectionState<Pr::Payload>>, ProjectionError> {
        if events.is_empty() {
            return Ok(None);
        }
        let mut next = base.clone();
        for event in events {
            next.apply(self.projector.as_ref(), event)?;
        }
        Ok(Some(next))
    }

    fn check_incoming(&self, incoming: &[Event<Pr::Event>]) -> Result<(), ProjectionError> {
        let watermark = self.safe.last_sortable_unique_id();
        let mut ids: HashSet<_> = self.buffer.iter().map(|e| e.id()).collect();
        let mut sortable_ids: HashSet<_> = self
            .buffer
            .iter()
            .map(|e| e.sortable_unique_id().clone())
            .collect();

        for event in incoming {
            if let Some(watermark) = watermark {
                if event.sortable_unique_id() <= watermark {
                    return Err(ProjectionError::NonMonotonic {
                        last: watermark.clone(),
                        found: event.sortable_unique_id().clone(),
                    });
                }
            }
            if !ids.insert(event.id()) || !sortable_ids.insert(event.sortable_unique_id().clone()) {
                return Err(ProjectionError::DuplicateEvent {
                    event_id: event.id(),
                    sortable_unique_id: event.sortable_unique_id().clone(),
                });
            }
        }
        Ok(())
    }
}
