use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use sekiban_core::PartitionKeys;
use sekiban_events::{Aggregate, DomainCommand, EventMetadata, Projector};

use crate::command_executor::{CommandExecutor, CommandResponse, ExecuteError};
use crate::event_store::EventStore;
use crate::repository::RepositoryError;
use crate::snapshot::SnapshotStore;

use super::{ActorLifecycle, TimedActor};

/// Owner of one cached aggregate.
///
/// Commands run against the cached copy; a failed command drops the cache so
/// the next call reloads from snapshot + store. Snapshots are written by the
/// persist timer (`on_tick`) only when the aggregate changed.
pub struct AggregateActor<S, SS, C, Pr>
where
    Pr: Projector,
{
    executor: Arc<CommandExecutor<S, SS, C, Pr>>,
    partition_keys: PartitionKeys,
    cached: Option<Aggregate<Pr::Payload>>,
    lifecycle: ActorLifecycle,
    dirty: bool,
}

impl<S, SS, C, Pr> core::fmt::Debug for AggregateActor<S, SS, C, Pr>
where
    Pr: Projector,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AggregateActor")
            .field("partition_keys", &self.partition_keys)
            .field("version", &self.cached.as_ref().map(|a| a.version()))
            .field("lifecycle", &self.lifecycle)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl<S, SS, C, Pr> AggregateActor<S, SS, C, Pr>
where
    S: EventStore,
    SS: SnapshotStore,
    C: DomainCommand,
    Pr: Projector,
{
    pub fn new(executor: Arc<CommandExecutor<S, SS, C, Pr>>, partition_keys: PartitionKeys) -> Self {
        Self {
            executor,
            partition_keys,
            cached: None,
            lifecycle: ActorLifecycle::Uninitialized,
            dirty: false,
        }
    }

    pub fn partition_keys(&self) -> &PartitionKeys {
        &self.partition_keys
    }

    pub fn lifecycle(&self) -> ActorLifecycle {
        self.lifecycle
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Load the aggregate unless it is already cached.
    pub async fn activate(&mut self) -> Result<(), RepositoryError> {
        let aggregate = self.take_or_load().await?;
        self.cached = Some(aggregate);
        Ok(())
    }

    /// Current aggregate, loading it first if needed.
    pub async fn state(&mut self) -> Result<&Aggregate<Pr::Payload>, RepositoryError> {
        let aggregate = self.take_or_load().await?;
        Ok(self.cached.insert(aggregate))
    }

    pub async fn execute(
        &mut self,
        command: &C,
        metadata: &EventMetadata,
    ) -> Result<CommandResponse<Pr::Event>, ExecuteError> {
        if command.partition_keys() != self.partition_keys {
            return Err(ExecuteError::Validation(format!(
                "command {} targets {}, actor owns {}",
                command.command_type(),
                command.partition_keys(),
                self.partition_keys
            )));
        }
        let aggregate = self.take_or_load().await?;

        match self.executor.execute_on(aggregate, command, metadata).await {
            Ok((aggregate, response)) => {
                if !response.events.is_empty() {
                    self.dirty = true;
                }
                self.cached = Some(aggregate);
                Ok(response)
            }
            Err(err) => {
                debug!(stream = %self.partition_keys, error = %err, "command failed, dropping cached aggregate");
                self.lifecycle = ActorLifecycle::Uninitialized;
                Err(err)
            }
        }
    }

    /// Discard the cache and replay the partition from the store.
    pub async fn rebuild(&mut self) -> Result<&Aggregate<Pr::Payload>, RepositoryError> {
        self.lifecycle = ActorLifecycle::Loading;
        let aggregate = self.executor.repository().rebuild(&self.partition_keys).await?;
        self.dirty = aggregate.version() > 0;
        self.lifecycle = ActorLifecycle::Ready;
        Ok(self.cached.insert(aggregate))
    }

    async fn take_or_load(&mut self) -> Result<Aggregate<Pr::Payload>, RepositoryError> {
        if let Some(aggregate) = self.cached.take() {
            return Ok(aggregate);
        }
        self.lifecycle = ActorLifecycle::Loading;
        match self.executor.repository().load(&self.partition_keys).await {
            Ok(aggregate) => {
                debug!(stream = %self.partition_keys, version = aggregate.version(), "aggregate actor activated");
                self.lifecycle = ActorLifecycle::Ready;
                Ok(aggregate)
            }
            Err(err) => {
                self.lifecycle = ActorLifecycle::Uninitialized;
                Err(err)
            }
        }
    }

    async fn persist_if_dirty(&mut self) -> Result<bool, RepositoryError> {
        let Some(aggregate) = self.cached.as_ref().filter(|_| self.dirty) else {
            return Ok(false);
        };
        let written = self.executor.repository().persist_snapshot(aggregate).await?;
        self.dirty = false;
        Ok(written)
    }
}

#[async_trait]
impl<S, SS, C, Pr> TimedActor for AggregateActor<S, SS, C, Pr>
where
    S: EventStore + 'static,
    SS: SnapshotStore + 'static,
    C: DomainCommand,
    Pr: Projector,
{
    type Error = RepositoryError;

    fn name(&self) -> &str {
        self.executor.repository().projector().name()
    }

    async fn on_tick(&mut self) -> Result<bool, RepositoryError> {
        let written = self.persist_if_dirty().await?;
        if written {
            debug!(stream = %self.partition_keys, "aggregate snapshot written by timer");
        }
        Ok(written)
    }

    async fn deactivate(&mut self) -> Result<(), RepositoryError> {
        if let Err(err) = self.persist_if_dirty().await {
            warn!(stream = %self.partition_keys, error = %err, "flush on deactivation failed");
            return Err(err);
        }
        self.cached = None;
        self.lifecycle = ActorLifecycle::Uninitialized;
        info!(stream = %self.partition_keys, "aggregate actor deactivated");
        Ok(())
    }
}
