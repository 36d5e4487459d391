//! Actor-style owners of projection state.
//!
//! Each actor is logically single-threaded: it takes `&mut self` for every
//! operation, so concurrent callers are serialized by whoever owns it (a
//! `tokio::sync::Mutex` in the hosted workers). The projection engine itself
//! stays runtime-agnostic; actors add the IO (store reads, snapshot writes)
//! and the lifecycle hooks.

pub mod aggregate_actor;
pub mod multi_projection_actor;
pub mod tag_state_actor;

use async_trait::async_trait;

pub use aggregate_actor::AggregateActor;
pub use multi_projection_actor::{MultiProjectionActor, MultiProjectionError};
pub use tag_state_actor::TagStateActor;

/// `Uninitialized → Loading → Ready`; deactivation returns to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActorLifecycle {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

/// An actor driven by a periodic persist timer.
#[async_trait]
pub trait TimedActor: Send {
    type Error: core::fmt::Display + Send;

    fn name(&self) -> &str;

    /// Timer callback. Returns whether a snapshot was written.
    async fn on_tick(&mut self) -> Result<bool, Self::Error>;

    /// Flush pending state and release it.
    async fn deactivate(&mut self) -> Result<(), Self::Error>;
}
