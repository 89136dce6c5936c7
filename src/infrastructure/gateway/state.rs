use std::time::Duration;

use tokio::time::Instant;

use super::error::{GatewayError, GatewayResult};
use super::heartbeat::HeartbeatMonitor;
use super::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardStatus {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Ready,
    ShuttingDown,
}

impl ShardStatus {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// A transport is open.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::AwaitingHello | Self::Identifying | Self::Resuming | Self::Ready
        )
    }

    #[must_use]
    pub const fn is_handshaking(&self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming)
    }

    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Disconnected | Self::ShuttingDown) => true,
            (Self::Disconnected, Self::Connecting) => true,
            (Self::Connecting, Self::AwaitingHello) => true,
            (
                Self::AwaitingHello | Self::Identifying | Self::Resuming | Self::Ready,
                Self::Identifying | Self::Resuming,
            ) => true,
            (Self::Identifying | Self::Resuming, Self::Ready) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::AwaitingHello => write!(f, "Awaiting Hello"),
            Self::Identifying => write!(f, "Identifying"),
            Self::Resuming => write!(f, "Resuming"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "Shutting Down"),
        }
    }
}

/// Everything a shard mutates, guarded by one lock per shard.
#[derive(Debug, Default)]
pub struct ShardState {
    status: ShardStatus,
    session: SessionState,
    heartbeat: HeartbeatMonitor,
    reconnect_attempts: u32,
    ready_at: Option<Instant>,
    ready_once: bool,
}

impl ShardState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: ShardStatus::Disconnected,
            session: SessionState::new(),
            heartbeat: HeartbeatMonitor::new(),
            reconnect_attempts: 0,
            ready_at: None,
            ready_once: false,
        }
    }

    #[must_use]
    pub const fn status(&self) -> ShardStatus {
        self.status
    }

    /// # Errors
    ///
    /// Returns `GatewayError::ProtocolViolation` if `next` is not reachable
    /// from the current status.
    pub fn transition(&mut self, next: ShardStatus) -> GatewayResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(GatewayError::protocol(format!(
                "invalid transition from {} to {next}",
                self.status
            )));
        }

        match next {
            ShardStatus::Ready => {
                self.ready_at = Some(Instant::now());
                self.ready_once = true;
                self.reconnect_attempts = 0;
            }
            ShardStatus::Connecting => {
                self.heartbeat = HeartbeatMonitor::new();
            }
            ShardStatus::Disconnected | ShardStatus::ShuttingDown => {
                self.ready_at = None;
            }
            _ => {}
        }

        self.status = next;
        Ok(())
    }

    pub const fn record_reconnect_attempt(&mut self) -> u32 {
        self.reconnect_attempts += 1;
        self.reconnect_attempts
    }

    pub const fn reset_reconnect_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    #[must_use]
    pub const fn session(&self) -> &SessionState {
        &self.session
    }

    pub const fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    #[must_use]
    pub const fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub const fn heartbeat_mut(&mut self) -> &mut HeartbeatMonitor {
        &mut self.heartbeat
    }

    #[must_use]
    pub const fn has_been_ready(&self) -> bool {
        self.ready_once
    }

    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.ready_at.map(|at| at.elapsed())
    }
}

/// Point-in-time view of a shard for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSnapshot {
    pub index: u32,
    pub status: ShardStatus,
    pub session_id: Option<String>,
    pub last_sequence: Option<u64>,
    pub latency: Option<Duration>,
    pub reconnect_attempts: u32,
}

impl ShardSnapshot {
    #[must_use]
    pub fn capture(index: u32, state: &ShardState) -> Self {
        Self {
            index,
            status: state.status(),
            session_id: state.session().session_id().map(String::from),
            last_sequence: state.session().last_sequence(),
            latency: state.heartbeat().latency(),
            reconnect_attempts: state.reconnect_attempts(),
        }
    }
}
