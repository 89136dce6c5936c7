//! Domain layer with core value objects and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{AuthToken, ShardCount, ShardDescriptor};
pub use errors::GatewayInfoError;
pub use ports::{EventSink, GatewayInfoPort};
