// src/core/mod.rs

//! The client core: connection strategy, pooled clients and live monitoring.

pub mod client;
pub mod database;
pub mod errors;
pub mod events;
pub mod factory;
pub mod metadata;
pub mod monitor;
pub mod native;
pub mod protocol;
pub mod registry;
pub mod ssh;
pub mod strategy;
pub mod telemetry;

pub use errors::RediscopeError;
