use std::time::Duration;

use serde_json::Value;

use super::payloads::Envelope;

/// Everything a shard reports to its coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEvent {
    Dispatch {
        shard: u32,
        event_name: String,
        sequence: u64,
        data: Value,
    },
    Ready {
        shard: u32,
        session_id: String,
    },
    Resumed {
        shard: u32,
    },
    Disconnected {
        shard: u32,
        reason: String,
        can_resume: bool,
    },
    Reconnecting {
        shard: u32,
        attempt: u32,
        delay: Duration,
    },
    HeartbeatAck {
        shard: u32,
        latency: Duration,
    },
    Raw {
        shard: u32,
        envelope: Envelope,
    },
    /// The shard stopped for good.
    Fatal {
        shard: u32,
        message: String,
    },
}

impl ShardEvent {
    #[must_use]
    pub const fn shard(&self) -> u32 {
        match self {
            Self::Dispatch { shard, .. }
            | Self::Ready { shard, .. }
            | Self::Resumed { shard }
            | Self::Disconnected { shard, .. }
            | Self::Reconnecting { shard, .. }
            | Self::HeartbeatAck { shard, .. }
            | Self::Raw { shard, .. }
            | Self::Fatal { shard, .. } => *shard,
        }
    }

    /// READY and RESUMED both put a shard back into service.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Resumed { .. })
    }

    #[must_use]
    pub const fn is_connection_event(&self) -> bool {
        matches!(
            self,
            Self::Ready { .. }
                | Self::Resumed { .. }
                | Self::Reconnecting { .. }
                | Self::Disconnected { .. }
        )
    }
}
