use std::path::PathBuf;

use clap::Parser;

use super::app_config::LogLevel;
use crate::domain::ShardCount;
use crate::infrastructure::gateway::Intents;

/// Command line options. Anything set here wins over `config.toml`.
#[derive(Parser)]
#[command(
    name = "shardline",
    version,
    about = "Connects a sharded bot session to the gateway and logs its events",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Bot token.
    #[arg(long, env = "SHARDLINE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Shard count, or "auto" to use the recommended count.
    #[arg(long)]
    pub shards: Option<ShardCount>,

    /// Gateway intents as flag names, e.g. "GUILDS | GUILD_MESSAGES".
    #[arg(long, value_parser = parse_intents)]
    pub intents: Option<Intents>,

    /// Request a zlib-compressed transport stream.
    #[arg(long)]
    pub compress: Option<bool>,

    /// Identify buckets per window.
    #[arg(long)]
    pub max_concurrency: Option<u32>,

    /// Gateway base URL.
    #[arg(long, value_name = "URL")]
    pub gateway_url: Option<String>,

    /// REST API base URL.
    #[arg(long, value_name = "URL")]
    pub api_base: Option<String>,

    /// Member count above which guilds are sent without offline members.
    #[arg(long)]
    pub large_threshold: Option<u8>,

    /// Reconnect attempts before a shard gives up.
    #[arg(long)]
    pub max_reconnect_attempts: Option<u32>,

    /// Identify rate window in milliseconds.
    #[arg(long, value_name = "MS")]
    pub identify_window_ms: Option<u64>,

    /// Forward every decoded envelope to raw listeners.
    #[arg(long)]
    pub emit_raw: Option<bool>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}

/// Accepts flag names joined by `|` or a raw integer bitmask.
fn parse_intents(value: &str) -> Result<Intents, String> {
    if let Ok(bits) = value.trim().parse::<u32>() {
        return Intents::from_bits(bits).ok_or_else(|| format!("unknown intent bits in {bits}"));
    }
    bitflags::parser::from_str::<Intents>(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("GUILDS", Intents::GUILDS ; "single flag")]
    #[test_case("GUILDS | GUILD_MESSAGES", Intents::GUILDS | Intents::GUILD_MESSAGES ; "joined flags")]
    #[test_case("513", Intents::GUILDS | Intents::GUILD_MESSAGES ; "integer mask")]
    #[test_case("", Intents::empty() ; "empty")]
    fn test_parse_intents(input: &str, expected: Intents) {
        assert_eq!(parse_intents(input).unwrap(), expected);
    }

    #[test_case("GUILD" ; "unknown name")]
    #[test_case("4194304" ; "unknown bit")]
    fn test_parse_intents_rejects(input: &str) {
        assert!(parse_intents(input).is_err());
    }

    #[test]
    fn test_rejects_zero_shards() {
        assert!(CliArgs::try_parse_from(["shardline", "--shards", "0"]).is_err());
    }
}
