//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the live path that feeds newly committed events to actors
//! without polling the store.
//!
//! ## Design Philosophy
//!
//! - **Transport-agnostic**: in-memory channels, broker pub/sub, etc.
//! - **At-least-once delivery**: consumers must tolerate redelivery; the
//!   multi-projection actor detects and reports duplicates.
//! - **No persistence**: the event store is the source of truth; a consumer that
//!   missed messages catches up from the store.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics), in publish order.
///
/// ```ignore
/// let mut subscription = bus.subscribe();
/// while let Some(event) = subscription.recv().await {
///     actor.handle_events(vec![event]).await?;
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Take a message if one is ready.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything currently queued (used to batch live deliveries).
    pub fn drain_ready(&mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(m) = self.receiver.try_recv() {
            out.push(m);
        }
        out
    }
}

/// Domain-agnostic pub/sub.
///
/// ```text
/// Command → Event Store (write) → Event Bus (publish) → Multi-projection actors
/// ```
///
/// Events are **stored first**, then published. If publication fails the
/// events are still in the store and subscribers recover them on catch-up.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
