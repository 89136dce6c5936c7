use std::time::Duration;

/// Identify budget reported alongside the recommended shard count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    pub max_concurrency: u32,
}

/// Recommended connection layout for a bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayBotInfo {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

impl GatewayBotInfo {
    #[must_use]
    pub const fn max_concurrency(&self) -> u32 {
        self.session_start_limit.max_concurrency
    }

    /// Whether `shards` more identifies fit in the remaining daily budget.
    #[must_use]
    pub const fn can_start(&self, shards: u32) -> bool {
        self.session_start_limit.remaining >= shards
    }
}
