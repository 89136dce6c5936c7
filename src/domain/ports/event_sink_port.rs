//! Collaborator notified of everything the shards receive.

use serde_json::Value;

/// Receives gateway events from the coordinator.
///
/// Calls happen on the coordinator's event task and must not block. Delivery
/// is fire-and-forget: nothing a sink does feeds back into the shards.
pub trait EventSink: Send + Sync {
    fn on_dispatch(&self, shard: u32, event_name: &str, sequence: u64, data: &Value);

    fn on_shard_ready(&self, shard: u32);

    fn on_shard_disconnect(&self, shard: u32, reason: &str);

    /// Fired once per shard set, when every shard has been ready at least once.
    fn on_all_shards_ready(&self);

    /// Every decoded envelope, when raw events are enabled.
    fn on_raw(&self, _shard: u32, _opcode: u64, _data: &Value) {}
}
