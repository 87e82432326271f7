// src/lib.rs

pub mod app;
pub mod config;
pub mod core;

// Re-export
pub use crate::core::RediscopeError;
pub use crate::core::client::RedisClient;
pub use crate::core::factory::DatabaseClientFactory;
pub use crate::core::monitor::MonitorService;
