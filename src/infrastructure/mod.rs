//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Gateway transport, shards and their coordinator.
pub mod gateway;
/// REST adapters.
pub mod rest;

pub use config::{AppConfig, CliArgs, ConfigError, LogLevel, StorageManager};
pub use gateway::{CoordinatorConfig, GatewayError, ShardCoordinator, WebSocketConnector};
pub use rest::GatewayInfoClient;
