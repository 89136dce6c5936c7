//! Domain error types.

mod gateway_info_error;

pub use gateway_info_error::GatewayInfoError;
