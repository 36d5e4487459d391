use std::collections::HashMap;

use thiserror::Error;

use sekiban_core::{DomainError, PartitionKeys};

use crate::event::EventMetadata;
use crate::projector::Projector;
use crate::state::Aggregate;

/// A command targets exactly one partition.
///
/// Commands represent **intent**. They are transient (never persisted); an
/// accepted command becomes events. `command_type()` is the key used to find
/// its handler in a [`CommandHandlers`] table.
pub trait DomainCommand: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn command_type(&self) -> &'static str;

    fn partition_keys(&self) -> PartitionKeys;
}

/// What a handler may look at: the current aggregate and the caller's metadata.
#[derive(Debug)]
pub struct CommandContext<'a, P> {
    aggregate: &'a Aggregate<P>,
    metadata: &'a EventMetadata,
}

impl<'a, P> CommandContext<'a, P> {
    pub fn new(aggregate: &'a Aggregate<P>, metadata: &'a EventMetadata) -> Self {
        Self {
            aggregate,
            metadata,
        }
    }

    pub fn aggregate(&self) -> &'a Aggregate<P> {
        self.aggregate
    }

    pub fn payload(&self) -> &'a P {
        self.aggregate.payload()
    }

    pub fn version(&self) -> u64 {
        self.aggregate.version()
    }

    pub fn metadata(&self) -> &'a EventMetadata {
        self.metadata
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("no handler registered for command type '{0}'")]
    Unregistered(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

type Handler<C, Pr> = Box<
    dyn Fn(
            &C,
            &CommandContext<'_, <Pr as Projector>::Payload>,
        ) -> Result<Vec<<Pr as Projector>::Event>, DomainError>
        + Send
        + Sync,
>;

/// Handler table keyed by command type, built once at startup.
///
/// Every entry has the same `(command, context) -> events` shape; handlers are
/// pure deciders and never touch storage.
pub struct CommandHandlers<C, Pr>
where
    Pr: Projector,
{
    handlers: HashMap<&'static str, Handler<C, Pr>>,
}

impl<C, Pr> core::fmt::Debug for CommandHandlers<C, Pr>
where
    Pr: Projector,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("CommandHandlers")
            .field("command_types", &types)
            .finish()
    }
}

impl<C, Pr> Default for CommandHandlers<C, Pr>
where
    Pr: Projector,
{
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C, Pr> CommandHandlers<C, Pr>
where
    C: DomainCommand,
    Pr: Projector,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, command_type: &'static str, handler: F) -> Self
    where
        F: Fn(&C, &CommandContext<'_, Pr::Payload>) -> Result<Vec<Pr::Event>, DomainError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(command_type, Box::new(handler));
        self
    }

    pub fn handles(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    pub fn handle(
        &self,
        command: &C,
        context: &CommandContext<'_, Pr::Payload>,
    ) -> Result<Vec<Pr::Event>, HandlerError> {
        let handler = self
            .handlers
            .get(command.command_type())
            .ok_or_else(|| HandlerError::Unregistered(command.command_type().to_string()))?;
        Ok(handler(command, context)?)
    }
}
