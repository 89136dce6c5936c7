//! Domain entity definitions.

mod gateway_info;
mod shard;
mod token;

pub use gateway_info::{GatewayBotInfo, SessionStartLimit};
pub use shard::{ShardCount, ShardDescriptor, shard_for_guild};
pub use token::AuthToken;
