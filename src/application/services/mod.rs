pub mod listener_registry;

pub use listener_registry::{EventKey, Listener, ListenerEvent, ListenerId, ListenerRegistry};
