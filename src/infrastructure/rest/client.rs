//! Discord REST client for the gateway info endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use tracing::{debug, warn};

use super::dto::{ErrorResponse, GatewayBotResponse};
use crate::domain::entities::{AuthToken, GatewayBotInfo};
use crate::domain::errors::GatewayInfoError;
use crate::domain::ports::GatewayInfoPort;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!("DiscordBot (shardline, ", env!("CARGO_PKG_VERSION"), ")");
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the recommended shard layout for a bot token.
pub struct GatewayInfoClient {
    client: Client,
    base_url: String,
    token: AuthToken,
}

impl GatewayInfoClient {
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(token: AuthToken) -> Result<Self, GatewayInfoError> {
        Self::with_base_url(token, DISCORD_API_BASE)
    }

    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn with_base_url(
        token: AuthToken,
        base_url: impl Into<String>,
    ) -> Result<Self, GatewayInfoError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayInfoError::network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn handle_error_response(
        status: StatusCode,
        response: reqwest::Response,
    ) -> GatewayInfoError {
        let body = response.json::<ErrorResponse>().await.ok();
        let message = body
            .as_ref()
            .map_or_else(|| format!("HTTP {status}"), |error| error.message.clone());

        match status {
            StatusCode::UNAUTHORIZED => GatewayInfoError::unauthorized("invalid bot token"),
            StatusCode::FORBIDDEN => GatewayInfoError::unauthorized(format!("access denied: {message}")),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = body.and_then(|error| error.retry_after).unwrap_or(5.0);
                let retry_after = Duration::from_secs_f64(retry_after.max(0.0));
                GatewayInfoError::RateLimited {
                    retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                }
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                GatewayInfoError::network("Discord API is temporarily unavailable")
            }
            _ => GatewayInfoError::invalid_response(format!("{status} - {message}")),
        }
    }
}

#[async_trait]
impl GatewayInfoPort for GatewayInfoClient {
    async fn fetch_gateway_info(&self) -> Result<GatewayBotInfo, GatewayInfoError> {
        let url = format!("{}/gateway/bot", self.base_url);

        debug!(token = %self.token, "Fetching recommended shard count");

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, self.token.authorization())
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to reach Discord API");
                if e.is_timeout() {
                    GatewayInfoError::network("request timed out")
                } else if e.is_connect() {
                    GatewayInfoError::network("failed to connect to Discord")
                } else {
                    GatewayInfoError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(status, response).await);
        }

        let body: GatewayBotResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse gateway info response");
            GatewayInfoError::invalid_response(e.to_string())
        })?;

        debug!(
            shards = body.shards,
            max_concurrency = body.session_start_limit.max_concurrency,
            "Gateway info fetched"
        );
        Ok(body.into())
    }
}
