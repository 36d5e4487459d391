use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sekiban_events::{EventBus, Projector, Subscription};

use crate::actors::{MultiProjectionActor, TimedActor};
use crate::event_store::{EventStore, StoredEvent};
use crate::snapshot::SnapshotStore;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the worker to flush and stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.join.await {
            warn!(worker = %self.name, error = %err, "worker task ended abnormally");
        }
    }
}

/// Drive a multi-projection actor from a live subscription plus its persist timer.
///
/// - bus deliveries go to `handle_events` (batched with whatever else is ready)
/// - every `persist_interval` the actor advances its safe border and persists if dirty
/// - on shutdown (or when the bus closes) the actor is deactivated, which flushes
///
/// The subscription is taken before activation, so nothing published during
/// catch-up is lost; overlaps are reported as duplicates by the actor.
pub fn spawn_multi_projection_worker<S, SS, Pr, B>(
    actor: Arc<Mutex<MultiProjectionActor<S, SS, Pr>>>,
    bus: &B,
    persist_interval: Duration,
) -> WorkerHandle
where
    S: EventStore + 'static,
    SS: SnapshotStore + 'static,
    Pr: Projector,
    B: EventBus<StoredEvent>,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let mut subscription: Subscription<StoredEvent> = bus.subscribe();
    let name = match actor.try_lock() {
        Ok(guard) => format!("multi-projection:{}", guard.snapshot_key()),
        Err(_) => "multi-projection".to_string(),
    };

    let worker_name = name.clone();
    let join = tokio::spawn(async move {
        info!(worker = %worker_name, "worker started");
        if let Err(err) = actor.lock().await.activate().await {
            warn!(worker = %worker_name, error = %err, "activation failed, retrying on next delivery");
        }

        let mut timer = tokio::time::interval(persist_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!(worker = %worker_name, "shutdown requested");
                    break;
                }
                delivered = subscription.recv() => {
                    let Some(first) = delivered else {
                        debug!(worker = %worker_name, "event bus closed");
                        break;
                    };
                    let mut batch = vec![first];
                    batch.extend(subscription.drain_ready());
                    if let Err(err) = actor.lock().await.handle_events(batch).await {
                        warn!(worker = %worker_name, error = %err, "live event handling failed, actor reset to catch up from the store");
                    }
                }
                _ = timer.tick() => {
                    if let Err(err) = actor.lock().await.on_tick().await {
                        warn!(worker = %worker_name, error = %err, "persist tick failed");
                    }
                }
            }
        }

        if let Err(err) = actor.lock().await.deactivate().await {
            warn!(worker = %worker_name, error = %err, "flush on shutdown failed");
        }
        info!(worker = %worker_name, "worker stopped");
    });

    WorkerHandle {
        name,
        shutdown: Some(shutdown_tx),
        join,
    }
}

/// Fire `on_tick` on any timed actor every `interval`; deactivate it on shutdown.
pub fn spawn_persist_timer<A>(actor: Arc<Mutex<A>>, interval: Duration) -> WorkerHandle
where
    A: TimedActor + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let name = match actor.try_lock() {
        Ok(guard) => format!("persist-timer:{}", guard.name()),
        Err(_) => "persist-timer".to_string(),
    };

    let worker_name = name.clone();
    let join = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = timer.tick() => {
                    match actor.lock().await.on_tick().await {
                        Ok(true) => debug!(worker = %worker_name, "snapshot persisted"),
                        Ok(false) => {}
                        Err(err) => warn!(worker = %worker_name, error = %err, "persist tick failed"),
                    }
                }
            }
        }

        if let Err(err) = actor.lock().await.deactivate().await {
            warn!(worker = %worker_name, error = %err, "flush on shutdown failed");
        }
    });

    WorkerHandle {
        name,
        shutdown: Some(shutdown_tx),
        join,
    }
}
