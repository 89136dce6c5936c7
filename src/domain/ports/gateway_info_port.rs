//! Gateway info lookup port.

use async_trait::async_trait;

use crate::domain::entities::GatewayBotInfo;
use crate::domain::errors::GatewayInfoError;

/// Source of the recommended shard count and identify concurrency.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayInfoPort: Send + Sync {
    async fn fetch_gateway_info(&self) -> Result<GatewayBotInfo, GatewayInfoError>;
}
