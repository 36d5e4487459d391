use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{Event, EventPayload};

/// A projector folds an ordered event stream into a payload.
///
/// One projector exists per aggregate type and per multi-projection type. The
/// same trait serves both: an aggregate projector only ever sees the events of
/// one partition, a multi-projector sees the global log.
///
/// ## Purity
///
/// `project` must be referentially transparent: no IO, no clock reads, no
/// hidden state. Replaying the same events must reproduce the same payload.
/// Everything the fold needs has to be on the event (payload, ids, metadata).
///
/// ## Unhandled events
///
/// `project` is total over the projector's event union. Event types a
/// projector does not care about should return the payload unchanged.
///
/// ## Versioning
///
/// `version()` tags every persisted state. A snapshot stamped with a different
/// version than the running projector is stale: it is discarded and the state is
/// rebuilt from the beginning of the store instead of caught up incrementally.
pub trait Projector: Send + Sync + 'static {
    type Event: EventPayload;
    type Payload: Clone
        + core::fmt::Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Stable projector name; part of snapshot keys.
    fn name(&self) -> &'static str;

    /// Schema version of the payload produced by this projector.
    fn version(&self) -> &'static str;

    /// Payload for the empty event sequence.
    fn initial_payload(&self) -> Self::Payload;

    fn project(&self, payload: Self::Payload, event: &Event<Self::Event>) -> Self::Payload;
}
