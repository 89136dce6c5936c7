use std::io;
use std::time::Duration;

use thiserror::Error;

use super::constants::GatewayOpcode;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failures turning a raw frame into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is not a well-formed envelope. The frame is dropped.
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    /// The compressed stream could not be inflated. The inflater state is lost.
    #[error("decompression failed: {reason}")]
    Inflate { reason: String },

    #[error("decompressed frame exceeds {limit} bytes")]
    Oversized { limit: usize },
}

impl DecodeError {
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn inflate(reason: impl Into<String>) -> Self {
        Self::Inflate {
            reason: reason.into(),
        }
    }

    /// Whether the connection must be replaced to decode further frames.
    #[must_use]
    pub const fn poisons_stream(&self) -> bool {
        matches!(self, Self::Inflate { .. } | Self::Oversized { .. })
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("connection closed with code {code}: {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("websocket error: {message}")]
    WebSocket { message: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("gateway rejected shard configuration (close code {code}): {reason}")]
    FatalClose { code: u16, reason: String },

    #[error("session invalidated, resumable: {resumable}")]
    SessionInvalidated { resumable: bool },

    #[error("heartbeat timeout: no acknowledgment received")]
    HeartbeatTimeout,

    #[error("identify slot not granted within {waited:?}")]
    RateLimited { waited: Duration },

    #[error("reconnection limit exceeded after {attempts} attempts")]
    ReconnectionLimitExceeded { attempts: u32 },

    #[error("serialization error: {message}")]
    SerializationError { message: String },

    #[error("protocol violation: unexpected opcode {opcode:?} while {state}")]
    UnexpectedOpcode {
        opcode: Option<GatewayOpcode>,
        state: String,
    },

    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("invalid shard configuration: {message}")]
    InvalidShard { message: String },

    #[error("gateway info request failed: {message}")]
    GatewayInfo { message: String },

    #[error("channel closed")]
    ChannelClosed,

    #[error("not connected to gateway")]
    NotConnected,

    #[error("gateway shutting down")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl GatewayError {
    #[must_use]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn invalid_shard(message: impl Into<String>) -> Self {
        Self::InvalidShard {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn gateway_info(message: impl Into<String>) -> Self {
        Self::GatewayInfo {
            message: message.into(),
        }
    }

    /// Classifies a close frame sent by the peer.
    #[must_use]
    pub fn from_close(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match GatewayCloseCode::from_u16(code) {
            Some(GatewayCloseCode::AuthenticationFailed) => Self::AuthenticationFailed {
                message: if reason.is_empty() {
                    "invalid token".to_string()
                } else {
                    reason
                },
            },
            Some(close) if close.is_fatal() => Self::FatalClose { code, reason },
            _ => Self::ConnectionClosed { code, reason },
        }
    }

    /// Fatal errors are surfaced to the coordinator and never retried.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::FatalClose { .. }
                | Self::ReconnectionLimitExceeded { .. }
                | Self::InvalidShard { .. }
                | Self::ShuttingDown
        )
    }

    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub const fn should_reconnect(&self) -> bool {
        match self {
            Self::AuthenticationFailed { .. }
            | Self::FatalClose { .. }
            | Self::ReconnectionLimitExceeded { .. }
            | Self::InvalidShard { .. }
            | Self::ShuttingDown => false,

            Self::ConnectionFailed { .. }
            | Self::ConnectionClosed { .. }
            | Self::WebSocket { .. }
            | Self::Decode(_)
            | Self::SessionInvalidated { .. }
            | Self::HeartbeatTimeout
            | Self::RateLimited { .. }
            | Self::SerializationError { .. }
            | Self::UnexpectedOpcode { .. }
            | Self::ProtocolViolation { .. }
            | Self::Timeout { .. }
            | Self::GatewayInfo { .. }
            | Self::ChannelClosed
            | Self::NotConnected
            | Self::Io(_) => true,
        }
    }

    /// Whether the session may be resumed after this error.
    #[must_use]
    pub fn can_resume(&self) -> bool {
        match self {
            Self::ConnectionClosed { code, .. } => GatewayCloseCode::from_u16(*code)
                .is_none_or(GatewayCloseCode::allows_resume),
            Self::SessionInvalidated { resumable } => *resumable,
            Self::ConnectionFailed { .. }
            | Self::WebSocket { .. }
            | Self::HeartbeatTimeout
            | Self::Decode(_)
            | Self::UnexpectedOpcode { .. }
            | Self::ProtocolViolation { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Io(_) => true,
            _ => false,
        }
    }

    #[must_use]
    pub const fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } | Self::FatalClose { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCloseCode {
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    DisallowedIntents = 4014,
}

impl GatewayCloseCode {
    #[must_use]
    pub const fn from_u16(code: u16) -> Option<Self> {
        match code {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// The session survives the close and may be resumed.
    #[must_use]
    pub const fn allows_resume(self) -> bool {
        !matches!(self, Self::InvalidSequence | Self::SessionTimedOut) && !self.is_fatal()
    }

    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }
}

impl From<GatewayCloseCode> for u16 {
    fn from(code: GatewayCloseCode) -> Self {
        code as Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_error_recoverability() {
        assert!(GatewayError::connection_failed("test").is_recoverable());
        assert!(GatewayError::connection_failed("dns lookup failed").can_resume());
        assert!(GatewayError::HeartbeatTimeout.is_recoverable());
        assert!(GatewayError::from(DecodeError::malformed("bad json")).is_recoverable());
        assert!(!GatewayError::auth_failed("test").is_recoverable());
        assert!(!GatewayError::ShuttingDown.should_reconnect());
        assert!(GatewayError::RateLimited {
            waited: Duration::from_secs(1)
        }
        .should_reconnect());
    }

    #[test_case(4000, true, true ; "unknown_error_resumes")]
    #[test_case(4003, true, true ; "not_authenticated_resumes")]
    #[test_case(4007, true, false ; "invalid_sequence_reidentifies")]
    #[test_case(4009, true, false ; "session_timeout_reidentifies")]
    #[test_case(4004, false, false ; "authentication_failed_is_fatal")]
    #[test_case(4014, false, false ; "disallowed_intents_is_fatal")]
    #[test_case(1006, true, true ; "abnormal_closure_resumes")]
    fn test_close_classification(code: u16, reconnect: bool, resume: bool) {
        let error = GatewayError::from_close(code, "");
        assert_eq!(error.should_reconnect(), reconnect);
        assert_eq!(error.can_resume(), resume);
    }

    #[test]
    fn test_authentication_close_maps_to_auth_error() {
        assert!(matches!(
            GatewayError::from_close(4004, "Authentication failed."),
            GatewayError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            GatewayError::from_close(4011, "Sharding required."),
            GatewayError::FatalClose { code: 4011, .. }
        ));
    }

    #[test]
    fn test_decode_error_stream_poisoning() {
        assert!(!DecodeError::malformed("x").poisons_stream());
        assert!(DecodeError::inflate("x").poisons_stream());
        assert!(DecodeError::Oversized { limit: 1 }.poisons_stream());
    }
}
