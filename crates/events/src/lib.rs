//! Events, projectors and the projection engine.
//!
//! Everything here is synchronous and in-memory: folding events into state
//! never suspends. Storage, snapshots and actor hosting live in `sekiban-infra`.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projector;
pub mod registry;
pub mod runner;
pub mod safe_unsafe;
pub mod state;
pub mod tag;

pub use bus::{EventBus, Subscription};
pub use command::{CommandContext, CommandHandlers, DomainCommand, HandlerError};
pub use envelope::SerializedEvent;
pub use event::{Event, EventMetadata, EventPayload};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projector::Projector;
pub use registry::{DecodeError, EventTypeRegistry};
pub use runner::{ProjectionError, ProjectionRunner};
pub use safe_unsafe::{IngestReport, SafeUnsafeProjection};
pub use state::{Aggregate, MultiProjectionState, ALL_ROOT_PARTITIONS};
pub use tag::TagState;
