//! Gateway info lookup errors.

use thiserror::Error;

/// Failures resolving the recommended shard layout.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum GatewayInfoError {
    #[error("token rejected by Discord: {message}")]
    Unauthorized { message: String },

    #[error("network error while fetching gateway info: {message}")]
    Network { message: String },

    #[error("rate limited by Discord, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("unexpected gateway info response: {message}")]
    InvalidResponse { message: String },
}

impl GatewayInfoError {
    /// Creates unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns whether the token itself was refused.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}
