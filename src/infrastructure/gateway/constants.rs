use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
pub const GATEWAY_VERSION: u8 = 10;
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

pub const RECONNECT_DELAY_BASE: Duration = Duration::from_secs(1);
pub const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(30);
pub const RECONNECT_JITTER_MAX: Duration = Duration::from_millis(500);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Bounds for the pause before retrying after an invalid session.
pub const INVALID_SESSION_DELAY_MIN: Duration = Duration::from_secs(1);
pub const INVALID_SESSION_DELAY_MAX: Duration = Duration::from_secs(5);

pub const MAX_RESUME_ATTEMPTS: u32 = 3;
pub const MAX_NOT_AUTHENTICATED_CLOSES: u32 = 2;

pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const IDENTIFY_WINDOW: Duration = Duration::from_secs(5);
pub const IDENTIFY_WAIT_BUDGET: Duration = Duration::from_secs(120);

pub const CLOSE_CODE_NORMAL: u16 = 1000;
/// Any non-1000 close keeps the session resumable on the peer side.
pub const CLOSE_CODE_RESUMABLE: u16 = 4000;

pub const CLIENT_PROPERTIES_OS: &str = std::env::consts::OS;
pub const CLIENT_PROPERTIES_BROWSER: &str = "shardline";
pub const CLIENT_PROPERTIES_DEVICE: &str = "shardline";

pub const LARGE_THRESHOLD: u8 = 250;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOpcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl GatewayOpcode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::PresenceUpdate),
            4 => Some(Self::VoiceStateUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestGuildMembers),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Opcodes a client sends but never receives.
    #[must_use]
    pub const fn is_outbound_only(self) -> bool {
        matches!(
            self,
            Self::Identify
                | Self::PresenceUpdate
                | Self::VoiceStateUpdate
                | Self::Resume
                | Self::RequestGuildMembers
        )
    }
}

impl From<GatewayOpcode> for u8 {
    fn from(opcode: GatewayOpcode) -> Self {
        opcode.as_u8()
    }
}

bitflags! {
    /// Gateway intents bitmask sent with identify.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Intents: u32 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EXPRESSIONS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;
        const GUILD_MESSAGE_POLLS = 1 << 24;
        const DIRECT_MESSAGE_POLLS = 1 << 25;
    }
}

impl Intents {
    /// Intents that require opting in from the application settings.
    pub const PRIVILEGED: Self = Self::GUILD_MEMBERS
        .union(Self::GUILD_PRESENCES)
        .union(Self::MESSAGE_CONTENT);

    #[must_use]
    pub const fn default_bot() -> Self {
        Self::GUILDS
            .union(Self::GUILD_MESSAGES)
            .union(Self::GUILD_MESSAGE_REACTIONS)
            .union(Self::DIRECT_MESSAGES)
    }

    #[must_use]
    pub const fn is_privileged(self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::default_bot()
    }
}

/// Builds the connection URL for a gateway base URL.
#[must_use]
pub fn gateway_connect_url(base: &str, compress: bool) -> String {
    let base = base.trim_end_matches('/');
    let mut url = format!("{base}/?v={GATEWAY_VERSION}&encoding=json");
    if compress {
        url.push_str("&compress=zlib-stream");
    }
    url
}
