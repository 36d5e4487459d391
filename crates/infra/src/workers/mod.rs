//! Hosted tokio workers that drive actors (live subscription + persist timers).

pub mod projection_worker;

pub use projection_worker::{WorkerHandle, spawn_multi_projection_worker, spawn_persist_timer};
