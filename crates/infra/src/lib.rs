//! Infrastructure layer: record stores, command dispatch, audit, notifications,
//! configuration and the services that expose the engine's commands and
//! queries.

pub mod audit;
pub mod command_dispatcher;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod notify;
pub mod services;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::{ServiceError, ServiceResult};
pub use store::{InMemoryRecordStore, RecordStore, StoreError};
