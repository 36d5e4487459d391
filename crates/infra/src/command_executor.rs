//! Command execution pipeline.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate (snapshot + delta) or take the caller's cached copy
//!   ↓
//! 2. Run the registered handler (pure decision, produces event payloads)
//!   ↓
//! 3. Stamp ids: strictly increasing sortable ids from the injected clock
//!   ↓
//! 4. Conditional append, expecting the aggregate's watermark
//!   ↓   └─ conflict: catch up, back off, re-run from 2 (bounded)
//! 5. Fold the committed events into the aggregate
//! ```
//!
//! Handlers never see storage; the executor never merges results of two
//! handler invocations. Callers get a structured [`ExecuteError`] telling
//! validation failures, conflicts and unexpected errors apart.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use sekiban_core::{Clock, DomainError, EventId, ExpectedLastId, PartitionKeys, SortableUniqueId};
use sekiban_events::{
    Aggregate, CommandContext, CommandHandlers, DomainCommand, Event, EventMetadata, HandlerError,
    ProjectionRunner, Projector,
};

use crate::event_store::{EventStore, UncommittedEvent};
use crate::repository::{AggregateRepository, RepositoryError};
use crate::snapshot::SnapshotStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found")]
    NotFound,

    /// Rejected by the handler because of the aggregate's current state (e.g. duplicate creation).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Every attempt lost the optimistic concurrency race.
    #[error("concurrency conflict after {attempts} attempt(s)")]
    Conflict { attempts: u32 },

    #[error("no handler registered for command type '{0}'")]
    UnknownCommand(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ExecuteError {
    /// Worth re-submitting the same command later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecuteError::Conflict { .. })
    }
}

impl From<DomainError> for ExecuteError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ExecuteError::Validation(msg),
            DomainError::InvariantViolation(msg) => ExecuteError::InvariantViolation(msg),
            DomainError::NotFound => ExecuteError::NotFound,
            DomainError::Conflict(msg) => ExecuteError::Rejected(msg),
        }
    }
}

impl From<HandlerError> for ExecuteError {
    fn from(value: HandlerError) -> Self {
        match value {
            HandlerError::Unregistered(command_type) => ExecuteError::UnknownCommand(command_type),
            HandlerError::Domain(err) => err.into(),
        }
    }
}

impl From<RepositoryError> for ExecuteError {
    fn from(value: RepositoryError) -> Self {
        if value.is_conflict() {
            return ExecuteError::Conflict { attempts: 1 };
        }
        ExecuteError::Unexpected(value.to_string())
    }
}

/// Outcome of an accepted command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse<E> {
    pub partition_keys: PartitionKeys,
    /// Committed events, with their versions. Empty when the handler decided nothing.
    pub events: Vec<Event<E>>,
    /// Aggregate version after the command.
    pub version: u64,
}

/// Runs commands of one aggregate type against an [`AggregateRepository`].
pub struct CommandExecutor<S, SS, C, Pr>
where
    Pr: Projector,
{
    repository: Arc<AggregateRepository<S, SS, Pr>>,
    handlers: Arc<CommandHandlers<C, Pr>>,
    clock: Arc<dyn Clock>,
}

impl<S, SS, C, Pr> core::fmt::Debug for CommandExecutor<S, SS, C, Pr>
where
    Pr: Projector,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl<S, SS, C, Pr> CommandExecutor<S, SS, C, Pr>
where
    S: EventStore,
    SS: SnapshotStore,
    C: DomainCommand,
    Pr: Projector,
{
    pub fn new(
        repository: Arc<AggregateRepository<S, SS, Pr>>,
        handlers: Arc<CommandHandlers<C, Pr>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            handlers,
            clock,
        }
    }

    pub fn repository(&self) -> &AggregateRepository<S, SS, Pr> {
        &self.repository
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Load the command's aggregate, then run it.
    pub async fn execute(
        &self,
        command: &C,
        metadata: &EventMetadata,
    ) -> Result<CommandResponse<Pr::Event>, ExecuteError> {
        if !self.handlers.handles(command.command_type()) {
            return Err(ExecuteError::UnknownCommand(command.command_type().to_string()));
        }
        let aggregate = self.repository.load(&command.partition_keys()).await?;
        let (_, response) = self.execute_on(aggregate, command, metadata).await?;
        Ok(response)
    }

    /// Run a command against an already loaded aggregate; returns the updated aggregate.
    pub async fn execute_on(
        &self,
        mut aggregate: Aggregate<Pr::Payload>,
        command: &C,
        metadata: &EventMetadata,
    ) -> Result<(Aggregate<Pr::Payload>, CommandResponse<Pr::Event>), ExecuteError> {
        let keys = command.partition_keys();
        if aggregate.partition_keys() != &keys {
            return Err(ExecuteError::Validation(format!(
                "command {} targets {keys}, aggregate is {}",
                command.command_type(),
                aggregate.partition_keys()
            )));
        }

        let policy = self.repository.retry_policy();
        let mut attempt: u32 = 0;
        loop {
            let payloads = {
                let context = CommandContext::new(&aggregate, metadata);
                self.handlers.handle(command, &context)?
            };
            if payloads.is_empty() {
                let version = aggregate.version();
                return Ok((
                    aggregate,
                    CommandResponse {
                        partition_keys: keys,
                        events: Vec::new(),
                        version,
                    },
                ));
            }

            let expected = ExpectedLastId::at(aggregate.last_sortable_unique_id().cloned());
            let uncommitted = self.stamp(&keys, aggregate.last_sortable_unique_id(), metadata, &payloads)?;

            match self.repository.save(expected, uncommitted).await {
                Ok(committed) => {
                    let mut runner = ProjectionRunner::resume(self.repository.projector(), aggregate);
                    runner
                        .run(&committed)
                        .map_err(|e| ExecuteError::Unexpected(e.to_string()))?;
                    let aggregate = runner.into_state();
                    debug!(
                        command = command.command_type(),
                        stream = %keys,
                        version = aggregate.version(),
                        events = committed.len(),
                        "command executed"
                    );
                    let version = aggregate.version();
                    return Ok((
                        aggregate,
                        CommandResponse {
                            partition_keys: keys,
                            events: committed,
                            version,
                        },
                    ));
                }
                Err(err) if err.is_conflict() => {
                    attempt += 1;
                    if attempt >= policy.max_attempts {
                        warn!(command = command.command_type(), stream = %keys, attempts = attempt, "giving up after repeated conflicts");
                        return Err(ExecuteError::Conflict { attempts: attempt });
                    }
                    let wait = policy.backoff(attempt - 1);
                    warn!(command = command.command_type(), stream = %keys, attempt, ?wait, "concurrency conflict, reloading");
                    tokio::time::sleep(wait).await;
                    aggregate = self.repository.catch_up(aggregate).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn stamp(
        &self,
        keys: &PartitionKeys,
        after: Option<&SortableUniqueId>,
        metadata: &EventMetadata,
        payloads: &[Pr::Event],
    ) -> Result<Vec<UncommittedEvent>, ExecuteError> {
        let mut previous = after.cloned();
        let mut stamped = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let id = SortableUniqueId::generate_next(self.clock.now(), Uuid::now_v7(), previous.as_ref());
            let event = UncommittedEvent::from_typed(EventId::new(), keys.clone(), id.clone(), metadata.clone(), payload)
                .map_err(|e| ExecuteError::Unexpected(e.to_string()))?;
            previous = Some(id);
            stamped.push(event);
        }
        Ok(stamped)
    }
}
