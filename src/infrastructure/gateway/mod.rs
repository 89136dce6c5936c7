mod backoff;
mod codec;
mod connection;
mod constants;
mod coordinator;
mod error;
mod events;
mod heartbeat;
mod identify_queue;
mod payloads;
mod session;
mod shard;
mod state;

pub use backoff::Backoff;
pub use codec::{EnvelopeCodec, Frame};
pub use connection::{GatewayTransport, TransportConnector, WebSocketConnector, WebSocketTransport};
pub use constants::{
    CLOSE_CODE_NORMAL, CLOSE_CODE_RESUMABLE, CONNECTION_TIMEOUT, DEFAULT_GATEWAY_URL,
    GATEWAY_VERSION, GatewayOpcode, HANDSHAKE_TIMEOUT, HELLO_TIMEOUT, IDENTIFY_WINDOW, Intents,
    LARGE_THRESHOLD, MAX_RECONNECT_ATTEMPTS, gateway_connect_url,
};
pub use coordinator::{CoordinatorConfig, ShardCoordinator};
pub use error::{DecodeError, GatewayCloseCode, GatewayError, GatewayResult};
pub use events::ShardEvent;
pub use heartbeat::{HeartbeatMonitor, HeartbeatPhase};
pub use identify_queue::{IdentifyGrant, IdentifyQueue};
pub use payloads::{
    Envelope, IdentifyData, PresenceActivity, PresenceStatus, PresenceUpdate, RequestGuildMembers,
    VoiceStateUpdate,
};
pub use session::{SequenceUpdate, SessionState};
pub use shard::{Shard, ShardConfig, ShardHandle};
pub use state::{ShardSnapshot, ShardStatus};
