//! Discord REST adapters.

mod client;
mod dto;

pub use client::{DISCORD_API_BASE, GatewayInfoClient};
