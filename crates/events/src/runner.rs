//! Aggregate replay with ordering checks.
//!
//! States are **disposable**; events are the source of truth. The runner
//! replays a partition's events through a projector and refuses anything that
//! would break the fold: events from another partition, events at or below the
//! current watermark, or version gaps.

use thiserror::Error;

use sekiban_core::{EventId, PartitionKeys, SortableUniqueId};

use crate::event::Event;
use crate::projector::Projector;
use crate::state::Aggregate;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("event of partition {found} applied to state of {expected}")]
    PartitionMismatch {
        expected: PartitionKeys,
        found: PartitionKeys,
    },

    #[error("non-monotonic event order (last: {last}, found: {found})")]
    NonMonotonic {
        last: SortableUniqueId,
        found: SortableUniqueId,
    },

    #[error("version gap (expected: {expected}, found: {found})")]
    VersionGap { expected: u64, found: u64 },

    #[error("duplicate event {event_id} ({sortable_unique_id})")]
    DuplicateEvent {
        event_id: EventId,
        sortable_unique_id: SortableUniqueId,
    },
}

/// Runs events through a projector into an [`Aggregate`] and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<'p, Pr>
where
    Pr: Projector,
{
    projector: &'p Pr,
    state: Aggregate<Pr::Payload>,
}

impl<'p, Pr> ProjectionRunner<'p, Pr>
where
    Pr: Projector,
{
    /// Start from the empty state of `partition_keys`.
    pub fn new(projector: &'p Pr, partition_keys: PartitionKeys) -> Self {
        Self {
            projector,
            state: Aggregate::empty(projector, partition_keys),
        }
    }

    /// Continue from an existing state (snapshot or cached aggregate).
    pub fn resume(projector: &'p Pr, state: Aggregate<Pr::Payload>) -> Self {
        Self { projector, state }
    }

    pub fn state(&self) -> &Aggregate<Pr::Payload> {
        &self.state
    }

    pub fn into_state(self) -> Aggregate<Pr::Payload> {
        self.state
    }

    /// Apply a single event, enforcing partition consistency and monotonic ordering.
    pub fn apply(&mut self, event: &Event<Pr::Event>) -> Result<(), ProjectionError> {
        self.state.apply(self.projector, event)
    }

    /// Apply many events in order. Stops at the first rejected event.
    pub fn run<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event<Pr::Event>>,
    ) -> Result<(), ProjectionError> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Rebuild an aggregate from scratch by replaying its full history.
    pub fn rebuild_from_scratch<'a>(
        projector: &'p Pr,
        partition_keys: PartitionKeys,
        events: impl IntoIterator<Item = &'a Event<Pr::Event>>,
    ) -> Result<Aggregate<Pr::Payload>, ProjectionError> {
        let mut runner = Self::new(projector, partition_keys);
        runner.run(events)?;
        Ok(runner.state)
    }
}
