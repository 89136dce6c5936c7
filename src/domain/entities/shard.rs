//! Shard identity value objects.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Position of one shard within a sharded session set.
///
/// Immutable once assigned. The rate-limit key selects the identify bucket the
/// shard shares with every shard whose index has the same remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardDescriptor {
    index: u32,
    total: u32,
    rate_limit_key: u32,
}

impl ShardDescriptor {
    /// Returns `None` unless `index < total` and both `total` and
    /// `max_concurrency` are non-zero.
    #[must_use]
    pub const fn new(index: u32, total: u32, max_concurrency: u32) -> Option<Self> {
        if total == 0 || max_concurrency == 0 || index >= total {
            return None;
        }
        Some(Self {
            index,
            total,
            rate_limit_key: index % max_concurrency,
        })
    }

    /// Descriptors for every shard of a set.
    #[must_use]
    pub fn all(total: u32, max_concurrency: u32) -> Vec<Self> {
        (0..total)
            .filter_map(|index| Self::new(index, total, max_concurrency))
            .collect()
    }

    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub const fn rate_limit_key(&self) -> u32 {
        self.rate_limit_key
    }

    /// `[index, total]` as carried by identify.
    #[must_use]
    pub const fn identify_pair(&self) -> [u32; 2] {
        [self.index, self.total]
    }
}

impl fmt::Display for ShardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.index, self.total)
    }
}

/// Index of the shard that receives events for a guild.
#[must_use]
pub const fn shard_for_guild(guild_id: u64, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let index = ((guild_id >> 22) % total as u64) as u32;
    index
}

/// Requested number of shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardCount {
    /// Use the count recommended by the gateway info endpoint.
    #[default]
    Auto,
    Fixed(u32),
}

impl Serialize for ShardCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Fixed(count) => serializer.serialize_u32(*count),
        }
    }
}

impl<'de> Deserialize<'de> for ShardCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(0) => Err(serde::de::Error::custom("shard count must be positive")),
            Raw::Count(count) => Ok(Self::Fixed(count)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl std::str::FromStr for ShardCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("shard count must be positive".to_string()),
            Ok(count) => Ok(Self::Fixed(count)),
            Err(_) => Err(format!("expected \"auto\" or a shard count, got {s:?}")),
        }
    }
}

impl fmt::Display for ShardCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Fixed(count) => write!(f, "{count}"),
        }
    }
}
