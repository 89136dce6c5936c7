//! Application configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::domain::{AuthToken, ShardCount};
use crate::infrastructure::gateway::{
    CONNECTION_TIMEOUT, CoordinatorConfig, DEFAULT_GATEWAY_URL, HANDSHAKE_TIMEOUT, HELLO_TIMEOUT,
    IDENTIFY_WINDOW, Intents, LARGE_THRESHOLD, MAX_RECONNECT_ATTEMPTS, ShardConfig,
};
use crate::infrastructure::rest::DISCORD_API_BASE;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Connection timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub connect_ms: u64,
    pub hello_ms: u64,
    pub handshake_ms: u64,
    /// Unset waits for the next heartbeat to notice a missing ack.
    pub heartbeat_ack_ms: Option<u64>,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: millis(CONNECTION_TIMEOUT),
            hello_ms: millis(HELLO_TIMEOUT),
            handshake_ms: millis(HANDSHAKE_TIMEOUT),
            heartbeat_ack_ms: None,
        }
    }
}

/// Application configuration, from `config.toml` and the command line.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Bot token. Usually left out of the file and passed through the
    /// environment instead.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    pub shards: ShardCount,

    /// Written as flag names, e.g. `"GUILDS | GUILD_MESSAGES"`.
    pub intents: Intents,

    /// Ask for a zlib-compressed transport stream.
    pub compress: bool,

    /// Identify buckets. Unset asks the gateway info endpoint.
    pub max_concurrency: Option<u32>,

    pub gateway_url: String,

    /// REST base used for gateway info lookups.
    pub api_base: String,

    pub large_threshold: u8,

    pub max_reconnect_attempts: u32,

    pub identify_window_ms: u64,

    /// Forward every decoded envelope to raw listeners.
    pub emit_raw: bool,

    pub timeouts: TimeoutsConfig,

    /// Log file path.
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    pub log_level: LogLevel,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("config", &self.config)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("shards", &self.shards)
            .field("intents", &self.intents)
            .field("compress", &self.compress)
            .field("max_concurrency", &self.max_concurrency)
            .field("gateway_url", &self.gateway_url)
            .field("api_base", &self.api_base)
            .field("large_threshold", &self.large_threshold)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("identify_window_ms", &self.identify_window_ms)
            .field("emit_raw", &self.emit_raw)
            .field("timeouts", &self.timeouts)
            .field("log_path", &self.log_path)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            token: None,
            shards: ShardCount::Auto,
            intents: Intents::default(),
            compress: false,
            max_concurrency: None,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            api_base: DISCORD_API_BASE.to_string(),
            large_threshold: LARGE_THRESHOLD,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            identify_window_ms: millis(IDENTIFY_WINDOW),
            emit_raw: false,
            timeouts: TimeoutsConfig::default(),
            log_path: None,
            log_level: LogLevel::Info,
        }
    }
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: CliArgs) {
        if let Some(config_path) = args.config {
            self.config = Some(config_path);
        }
        if let Some(token) = args.token {
            self.token = Some(token);
        }
        if let Some(shards) = args.shards {
            self.shards = shards;
        }
        if let Some(intents) = args.intents {
            self.intents = intents;
        }
        if let Some(compress) = args.compress {
            self.compress = compress;
        }
        if let Some(max_concurrency) = args.max_concurrency {
            self.max_concurrency = Some(max_concurrency);
        }
        if let Some(gateway_url) = args.gateway_url {
            self.gateway_url = gateway_url;
        }
        if let Some(api_base) = args.api_base {
            self.api_base = api_base;
        }
        if let Some(large_threshold) = args.large_threshold {
            self.large_threshold = large_threshold;
        }
        if let Some(attempts) = args.max_reconnect_attempts {
            self.max_reconnect_attempts = attempts;
        }
        if let Some(window) = args.identify_window_ms {
            self.identify_window_ms = window;
        }
        if let Some(emit_raw) = args.emit_raw {
            self.emit_raw = emit_raw;
        }
        if let Some(log_path) = args.log_path {
            self.log_path = Some(log_path);
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_ms)
    }

    /// Builds the coordinator settings for `token`.
    #[must_use]
    pub fn to_coordinator_config(&self, token: AuthToken) -> CoordinatorConfig {
        let mut shard = ShardConfig::new(token);
        shard.intents = self.intents;
        shard.compress = self.compress;
        shard.gateway_url.clone_from(&self.gateway_url);
        shard.large_threshold = self.large_threshold;
        shard.max_reconnect_attempts = self.max_reconnect_attempts;
        shard.emit_raw = self.emit_raw;
        shard.hello_timeout = Duration::from_millis(self.timeouts.hello_ms);
        shard.handshake_timeout = Duration::from_millis(self.timeouts.handshake_ms);
        shard.heartbeat_ack_timeout = self.timeouts.heartbeat_ack_ms.map(Duration::from_millis);

        let mut coordinator = CoordinatorConfig::new(shard);
        coordinator.shards = self.shards;
        coordinator.max_concurrency = self.max_concurrency;
        coordinator.identify_window = Duration::from_millis(self.identify_window_ms);
        coordinator
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const TOKEN: &str = "MTIzNDU2Nzg5MDEyMzQ1Njc4.GhIjKl.abcdefghijklmnopqrstuvwxyz0123456789";

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
            shards = 4
            intents = "GUILDS | GUILD_MESSAGES"
            compress = true
            max_concurrency = 16
            gateway_url = "wss://gateway.test"
            emit_raw = true
            log_level = "debug"

            [timeouts]
            hello_ms = 2500
            heartbeat_ack_ms = 15000
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.shards, ShardCount::Fixed(4));
        assert_eq!(config.intents, Intents::GUILDS | Intents::GUILD_MESSAGES);
        assert!(config.compress);
        assert_eq!(config.max_concurrency, Some(16));
        assert_eq!(config.gateway_url, "wss://gateway.test");
        assert!(config.emit_raw);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.timeouts.hello_ms, 2500);
        assert_eq!(config.timeouts.connect_ms, 30_000);
        assert_eq!(config.timeouts.heartbeat_ack_ms, Some(15_000));
        assert_eq!(config.api_base, DISCORD_API_BASE);
    }

    #[test]
    fn test_auto_shards_and_zero_rejected() {
        let config: AppConfig = toml::from_str(r#"shards = "auto""#).unwrap();
        assert_eq!(config.shards, ShardCount::Auto);

        assert!(toml::from_str::<AppConfig>("shards = 0").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.shards, ShardCount::Auto);
        assert_eq!(config.intents, Intents::default());
        assert_eq!(config.max_concurrency, None);
        assert_eq!(config.identify_window_ms, 5_000);
        assert_eq!(config.connect_timeout(), CONNECTION_TIMEOUT);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config: AppConfig = toml::from_str("shards = 2\ncompress = true").unwrap();
        let args = CliArgs::try_parse_from([
            "shardline",
            "--shards",
            "auto",
            "--compress",
            "false",
            "--intents",
            "GUILDS | DIRECT_MESSAGES",
            "--log-level",
            "warn",
        ])
        .unwrap();

        config.merge_with_args(args);

        assert_eq!(config.shards, ShardCount::Auto);
        assert!(!config.compress);
        assert_eq!(config.intents, Intents::GUILDS | Intents::DIRECT_MESSAGES);
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_coordinator_config_carries_settings() {
        let mut config = AppConfig::default();
        config.shards = ShardCount::Fixed(3);
        config.max_concurrency = Some(2);
        config.identify_window_ms = 1_000;
        config.timeouts.handshake_ms = 4_000;
        config.timeouts.heartbeat_ack_ms = Some(9_000);
        config.emit_raw = true;

        let coordinator = config.to_coordinator_config(AuthToken::new_unchecked(TOKEN));

        assert_eq!(coordinator.shards, ShardCount::Fixed(3));
        assert_eq!(coordinator.max_concurrency, Some(2));
        assert_eq!(coordinator.identify_window, Duration::from_secs(1));
        assert_eq!(coordinator.shard.handshake_timeout, Duration::from_secs(4));
        assert_eq!(
            coordinator.shard.heartbeat_ack_timeout,
            Some(Duration::from_secs(9))
        );
        assert!(coordinator.shard.emit_raw);
        assert_eq!(coordinator.shard.token.as_str(), TOKEN);
    }

    #[test]
    fn test_debug_hides_token() {
        let mut config = AppConfig::default();
        config.token = Some(TOKEN.to_string());

        let printed = format!("{config:?}");
        assert!(!printed.contains(TOKEN));
        assert!(printed.contains("<redacted>"));
    }
}
