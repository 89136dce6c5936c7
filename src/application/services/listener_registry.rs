//! Per-event-kind listener lists.
//!
//! Listeners can be added and removed while shards are running. Each emit
//! works on a snapshot of the list, so a listener may register or deregister
//! others (or itself) without deadlocking; the change applies from the next
//! event on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::domain::ports::EventSink;

/// What a listener subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// Dispatches with this event name, e.g. `MESSAGE_CREATE`.
    Dispatch(String),
    /// Every dispatch, after the name-specific listeners.
    AnyDispatch,
    Raw,
    ShardReady,
    ShardDisconnect,
    AllShardsReady,
}

impl EventKey {
    #[must_use]
    pub fn dispatch(name: impl Into<String>) -> Self {
        Self::Dispatch(name.into())
    }
}

/// An event as seen by listeners. Borrows from the coordinator's event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ListenerEvent<'a> {
    Dispatch {
        shard: u32,
        name: &'a str,
        sequence: u64,
        data: &'a Value,
    },
    Raw {
        shard: u32,
        opcode: u64,
        data: &'a Value,
    },
    ShardReady {
        shard: u32,
    },
    ShardDisconnect {
        shard: u32,
        reason: &'a str,
    },
    AllShardsReady,
}

impl ListenerEvent<'_> {
    /// Shard the event came from; `None` for set-wide events.
    #[must_use]
    pub const fn shard(&self) -> Option<u32> {
        match self {
            Self::Dispatch { shard, .. }
            | Self::Raw { shard, .. }
            | Self::ShardReady { shard }
            | Self::ShardDisconnect { shard, .. } => Some(*shard),
            Self::AllShardsReady => None,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ListenerEvent<'_>) + Send + Sync>;

/// Returned by `register`; pass it to `deregister` to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<EventKey, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&EventKey, usize> =
            listeners.iter().map(|(key, list)| (key, list.len())).collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` to the list for `key`.
    pub fn register<F>(&self, key: EventKey, listener: F) -> ListenerId
    where
        F: Fn(&ListenerEvent<'_>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(%id, ?key, "Registering listener");
        self.listeners
            .write()
            .entry(key)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn deregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        listeners.retain(|_, list| {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        if removed {
            trace!(%id, "Deregistered listener");
        }
        removed
    }

    #[must_use]
    pub fn listener_count(&self, key: &EventKey) -> usize {
        self.listeners.read().get(key).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invokes every listener interested in `event`, in registration order.
    /// Name-specific dispatch listeners run before `AnyDispatch` ones.
    pub fn emit(&self, event: &ListenerEvent<'_>) {
        let keys = match event {
            ListenerEvent::Dispatch { name, .. } => {
                vec![EventKey::dispatch(*name), EventKey::AnyDispatch]
            }
            ListenerEvent::Raw { .. } => vec![EventKey::Raw],
            ListenerEvent::ShardReady { .. } => vec![EventKey::ShardReady],
            ListenerEvent::ShardDisconnect { .. } => vec![EventKey::ShardDisconnect],
            ListenerEvent::AllShardsReady => vec![EventKey::AllShardsReady],
        };

        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read();
            keys.iter()
                .filter_map(|key| listeners.get(key))
                .flatten()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        for listener in snapshot {
            listener(event);
        }
    }
}

impl EventSink for ListenerRegistry {
    fn on_dispatch(&self, shard: u32, event_name: &str, sequence: u64, data: &Value) {
        self.emit(&ListenerEvent::Dispatch {
            shard,
            name: event_name,
            sequence,
            data,
        });
    }

    fn on_shard_ready(&self, shard: u32) {
        self.emit(&ListenerEvent::ShardReady { shard });
    }

    fn on_shard_disconnect(&self, shard: u32, reason: &str) {
        self.emit(&ListenerEvent::ShardDisconnect { shard, reason });
    }

    fn on_all_shards_ready(&self) {
        self.emit(&ListenerEvent::AllShardsReady);
    }

    fn on_raw(&self, shard: u32, opcode: u64, data: &Value) {
        self.emit(&ListenerEvent::Raw {
            shard,
            opcode,
            data,
        });
    }
}
