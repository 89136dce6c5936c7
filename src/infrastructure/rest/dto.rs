use std::time::Duration;

use serde::Deserialize;

use crate::domain::entities::{GatewayBotInfo, SessionStartLimit};

/// `GET /gateway/bot` response.
#[derive(Debug, Deserialize)]
pub struct GatewayBotResponse {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimitResponse,
}

#[derive(Debug, Deserialize)]
pub struct SessionStartLimitResponse {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets.
    pub reset_after: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

const fn default_max_concurrency() -> u32 {
    1
}

impl From<GatewayBotResponse> for GatewayBotInfo {
    fn from(response: GatewayBotResponse) -> Self {
        let limit = response.session_start_limit;
        Self {
            url: response.url,
            shards: response.shards,
            session_start_limit: SessionStartLimit {
                total: limit.total,
                remaining: limit.remaining,
                reset_after: Duration::from_millis(limit.reset_after),
                max_concurrency: limit.max_concurrency,
            },
        }
    }
}

/// Discord API error response structure.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    /// Seconds to wait, present on 429 responses.
    #[serde(default)]
    pub retry_after: Option<f64>,
}
