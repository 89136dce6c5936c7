//! Application layer: what callers plug into the gateway.

/// Event listener registry.
pub mod services;

pub use services::{EventKey, Listener, ListenerEvent, ListenerId, ListenerRegistry};
