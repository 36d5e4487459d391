//! Infrastructure layer: event store, snapshots, configuration and the
//! actor-style orchestration around the projection engine.

pub mod actors;
pub mod command_executor;
pub mod config;
pub mod event_store;
pub mod repository;
pub mod retry;
pub mod snapshot;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use command_executor::{CommandExecutor, CommandResponse, ExecuteError};
pub use config::{ConfigError, SekibanOptions};
pub use repository::{AggregateRepository, RepositoryError};
pub use retry::RetryPolicy;
