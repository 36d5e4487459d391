//! `sekiban-core` — event-sourcing foundation building blocks.
//!
//! This crate contains **pure** primitives shared by every other crate: ordering
//! keys, partition addressing, identifiers, concurrency expectations and the
//! injected time source. No IO, no async.

pub mod clock;
pub mod concurrency;
pub mod error;
pub mod id;
pub mod partition;
pub mod sortable_id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use concurrency::ExpectedLastId;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, EventId};
pub use partition::PartitionKeys;
pub use sortable_id::SortableUniqueId;
