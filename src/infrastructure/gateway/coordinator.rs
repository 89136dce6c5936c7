//! Owns the shard set: resolves its size, shares the identify window between
//! shards, fans events out to the sink and tracks readiness.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::connection::TransportConnector;
use super::constants::{GatewayOpcode, IDENTIFY_WINDOW};
use super::error::{GatewayError, GatewayResult};
use super::events::ShardEvent;
use super::identify_queue::IdentifyQueue;
use super::payloads::{Envelope, PresenceUpdate, RequestGuildMembers, VoiceStateUpdate};
use super::shard::{Shard, ShardConfig, ShardHandle};
use super::state::ShardSnapshot;
use crate::domain::entities::{GatewayBotInfo, ShardCount, ShardDescriptor, shard_for_guild};
use crate::domain::ports::{EventSink, GatewayInfoPort};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub shards: ShardCount,
    /// Identify buckets. `None` asks the gateway info source, falling back to 1.
    pub max_concurrency: Option<u32>,
    pub identify_window: Duration,
    pub shard: ShardConfig,
}

impl CoordinatorConfig {
    #[must_use]
    pub const fn new(shard: ShardConfig) -> Self {
        Self {
            shards: ShardCount::Auto,
            max_concurrency: None,
            identify_window: IDENTIFY_WINDOW,
            shard,
        }
    }
}

#[derive(Debug)]
struct ShardPlan {
    total: u32,
    max_concurrency: u32,
    gateway_url: String,
}

struct ShardSet {
    total: u32,
    handles: Vec<ShardHandle>,
    tasks: JoinSet<(u32, GatewayResult<()>)>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

pub struct ShardCoordinator {
    config: CoordinatorConfig,
    connector: Arc<dyn TransportConnector>,
    gateway_info: Option<Arc<dyn GatewayInfoPort>>,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    shards: Option<ShardSet>,
    /// Outlives shard sets so a reshard cannot identify inside the window.
    identify: Option<IdentifyQueue>,
}

impl ShardCoordinator {
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        connector: Arc<dyn TransportConnector>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            connector,
            gateway_info: None,
            sink,
            shutdown: CancellationToken::new(),
            shards: None,
            identify: None,
        }
    }

    /// Source for `ShardCount::Auto` and unset identify concurrency.
    #[must_use]
    pub fn with_gateway_info(mut self, gateway_info: Arc<dyn GatewayInfoPort>) -> Self {
        self.gateway_info = Some(gateway_info);
        self
    }

    /// Cancelling this token stops every shard gracefully.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn total_shards(&self) -> Option<u32> {
        self.shards.as_ref().map(|set| set.total)
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<ShardSnapshot> {
        self.shards
            .as_ref()
            .map(|set| set.handles.iter().map(ShardHandle::snapshot).collect())
            .unwrap_or_default()
    }

    /// Resolves the shard layout and spawns one task per shard.
    ///
    /// # Errors
    ///
    /// Returns an error if shards are already running, if the layout cannot be
    /// resolved, or if the coordinator has been shut down.
    pub async fn start(&mut self) -> GatewayResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::ShuttingDown);
        }
        if self.shards.is_some() {
            return Err(GatewayError::protocol("shards are already running"));
        }

        let plan = self.resolve_plan().await?;
        self.spawn_shards(plan);
        Ok(())
    }

    async fn resolve_plan(&self) -> GatewayResult<ShardPlan> {
        let needs_info =
            self.config.shards == ShardCount::Auto || self.config.max_concurrency.is_none();

        let info = match (&self.gateway_info, needs_info) {
            (Some(port), true) => {
                let info = port.fetch_gateway_info().await.map_err(|e| {
                    if e.is_auth_failure() {
                        GatewayError::auth_failed(e.to_string())
                    } else {
                        GatewayError::gateway_info(e.to_string())
                    }
                })?;
                debug!(
                    shards = info.shards,
                    max_concurrency = info.max_concurrency(),
                    remaining = info.session_start_limit.remaining,
                    "Fetched gateway info"
                );
                Some(info)
            }
            _ => None,
        };

        let total = match (self.config.shards, &info) {
            (ShardCount::Fixed(0), _) => {
                return Err(GatewayError::invalid_shard("shard count must be positive"));
            }
            (ShardCount::Fixed(total), _) => total,
            (ShardCount::Auto, Some(info)) => info.shards.max(1),
            (ShardCount::Auto, None) => {
                return Err(GatewayError::invalid_shard(
                    "shard count \"auto\" requires a gateway info source",
                ));
            }
        };

        let max_concurrency = self
            .config
            .max_concurrency
            .or_else(|| info.as_ref().map(GatewayBotInfo::max_concurrency))
            .unwrap_or(1)
            .max(1);

        if let Some(info) = &info
            && !info.can_start(total)
        {
            warn!(
                remaining = info.session_start_limit.remaining,
                shards = total,
                reset_after_ms = info.session_start_limit.reset_after.as_millis(),
                "Daily session start budget is lower than the shard count"
            );
        }

        let gateway_url = info.map_or_else(|| self.config.shard.gateway_url.clone(), |info| info.url);

        Ok(ShardPlan {
            total,
            max_concurrency,
            gateway_url,
        })
    }

    fn spawn_shards(&mut self, plan: ShardPlan) {
        let cancel = self.shutdown.child_token();
        let window = self.config.identify_window;
        let identify = self.identify.as_ref().map_or_else(
            || IdentifyQueue::new(plan.max_concurrency, window),
            |queue| queue.rebuild(plan.max_concurrency, window),
        );
        self.identify = Some(identify.clone());

        let mut shard_config = self.config.shard.clone();
        shard_config.gateway_url = plan.gateway_url;
        let shard_config = Arc::new(shard_config);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut handles = Vec::with_capacity(plan.total as usize);

        for descriptor in ShardDescriptor::all(plan.total, plan.max_concurrency) {
            let (shard, handle) = Shard::new(
                descriptor,
                Arc::clone(&shard_config),
                Arc::clone(&self.connector),
                identify.clone(),
                events_tx.clone(),
                cancel.clone(),
            );
            let index = descriptor.index();
            tasks.spawn(async move { (index, shard.run().await) });
            handles.push(handle);
        }
        drop(events_tx);

        let pump = tokio::spawn(pump_events(events_rx, Arc::clone(&self.sink), plan.total));
        info!(
            shards = plan.total,
            max_concurrency = plan.max_concurrency,
            "Started shards"
        );

        self.shards = Some(ShardSet {
            total: plan.total,
            handles,
            tasks,
            cancel,
            pump,
        });
    }

    /// Waits for every shard to stop. The first fatal shard error stops the
    /// remaining shards and is returned.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error reported by a shard.
    pub async fn join(&mut self) -> GatewayResult<()> {
        let Some(set) = self.shards.as_mut() else {
            return Ok(());
        };

        let mut first_error = None;
        while let Some(joined) = set.tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((index, Err(e))) => {
                    error!(shard = index, error = %e, "Shard failed, stopping remaining shards");
                    set.cancel.cancel();
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "Shard task aborted");
                    set.cancel.cancel();
                }
            }
        }

        if let Some(set) = self.shards.take()
            && let Err(e) = set.pump.await
        {
            warn!(error = %e, "Event pump aborted");
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Stops every shard, closing sessions normally.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error a shard hit before stopping.
    pub async fn shutdown(&mut self) -> GatewayResult<()> {
        info!("Shutting down shards");
        self.shutdown.cancel();
        self.join().await
    }

    /// Tears the current shard set down and starts a new one with `shards`.
    /// Shards mid-resume finish their resume before closing.
    ///
    /// # Errors
    ///
    /// Returns an error if the old set failed fatally or the new one cannot
    /// be started.
    pub async fn reshard(&mut self, shards: ShardCount) -> GatewayResult<()> {
        if let Some(set) = &self.shards {
            info!(from = set.total, to = %shards, "Resharding");
            set.cancel.cancel();
        }
        self.join().await?;

        self.config.shards = shards;
        self.start().await
    }

    fn handle(&self, shard: u32) -> GatewayResult<&ShardHandle> {
        let set = self.shards.as_ref().ok_or(GatewayError::NotConnected)?;
        set.handles
            .get(shard as usize)
            .ok_or_else(|| GatewayError::invalid_shard(format!("no shard {shard} of {}", set.total)))
    }

    /// Sends an outbound command on one shard.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope is not a client command or the shard
    /// does not exist.
    pub async fn send(&self, shard: u32, envelope: Envelope) -> GatewayResult<()> {
        let is_command = matches!(
            envelope.kind(),
            Some(
                GatewayOpcode::PresenceUpdate
                    | GatewayOpcode::VoiceStateUpdate
                    | GatewayOpcode::RequestGuildMembers
            )
        );
        if !is_command {
            return Err(GatewayError::protocol(format!(
                "opcode {} is not a gateway command",
                envelope.opcode
            )));
        }

        trace!(shard, op = envelope.opcode, "Routing command");
        self.handle(shard)?.send(envelope).await
    }

    /// Shard that carries events for `guild_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if shards are not running or the id is not numeric.
    pub fn shard_for_guild(&self, guild_id: &str) -> GatewayResult<u32> {
        let total = self.total_shards().ok_or(GatewayError::NotConnected)?;
        let guild_id: u64 = guild_id
            .parse()
            .map_err(|_| GatewayError::protocol(format!("invalid guild id {guild_id:?}")))?;
        Ok(shard_for_guild(guild_id, total))
    }

    /// # Errors
    ///
    /// Returns an error if a shard has stopped.
    pub async fn update_presence(&self, presence: &PresenceUpdate) -> GatewayResult<()> {
        let envelope = Envelope::presence_update(presence)?;
        for shard in 0..self.total_shards().ok_or(GatewayError::NotConnected)? {
            self.send(shard, envelope.clone()).await?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the guild id is invalid or its shard has stopped.
    pub async fn update_voice_state(&self, update: &VoiceStateUpdate) -> GatewayResult<()> {
        let shard = self.shard_for_guild(&update.guild_id)?;
        self.send(shard, Envelope::voice_state_update(update)?).await
    }

    /// # Errors
    ///
    /// Returns an error if the guild id is invalid or its shard has stopped.
    pub async fn request_guild_members(&self, request: &RequestGuildMembers) -> GatewayResult<()> {
        let shard = self.shard_for_guild(&request.guild_id)?;
        self.send(shard, Envelope::request_guild_members(request)?).await
    }
}

/// Tracks which shards have been ready at least once.
#[derive(Debug)]
struct Readiness {
    ready: Vec<bool>,
    remaining: usize,
    announced: bool,
}

impl Readiness {
    fn new(total: u32) -> Self {
        Self {
            ready: vec![false; total as usize],
            remaining: total as usize,
            announced: false,
        }
    }

    /// `true` exactly once, when the last shard first becomes ready.
    fn mark_ready(&mut self, shard: u32) -> bool {
        if let Some(slot) = self.ready.get_mut(shard as usize)
            && !*slot
        {
            *slot = true;
            self.remaining -= 1;
        }

        if self.remaining == 0 && !self.announced {
            self.announced = true;
            return true;
        }
        false
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<ShardEvent>,
    sink: Arc<dyn EventSink>,
    total: u32,
) {
    let mut readiness = Readiness::new(total);

    while let Some(event) = events.recv().await {
        match event {
            ShardEvent::Dispatch {
                shard,
                event_name,
                sequence,
                data,
            } => sink.on_dispatch(shard, &event_name, sequence, &data),
            ShardEvent::Ready { shard, .. } | ShardEvent::Resumed { shard } => {
                sink.on_shard_ready(shard);
                if readiness.mark_ready(shard) {
                    info!(shards = total, "All shards ready");
                    sink.on_all_shards_ready();
                }
            }
            ShardEvent::Disconnected { shard, reason, .. } => {
                sink.on_shard_disconnect(shard, &reason);
            }
            ShardEvent::Raw { shard, envelope } => {
                sink.on_raw(shard, envelope.opcode, &envelope.data);
            }
            ShardEvent::Reconnecting {
                shard,
                attempt,
                delay,
            } => debug!(shard, attempt, delay_ms = delay.as_millis(), "Shard reconnecting"),
            ShardEvent::HeartbeatAck { shard, latency } => {
                trace!(shard, latency_ms = latency.as_millis(), "Heartbeat latency");
            }
            ShardEvent::Fatal { shard, message } => {
                error!(shard, error = %message, "Shard stopped permanently");
            }
        }
    }

    debug!("Event pump stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::time::Instant;

    use super::super::connection::testing::{ScriptedConnector, ServerConnection};
    use super::*;
    use crate::domain::entities::{AuthToken, SessionStartLimit};
    use crate::domain::errors::GatewayInfoError;
    use crate::domain::ports::mocks::MockGatewayInfoPort;

    const INTERVAL_MS: u64 = 41_250;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkCall {
        Dispatch(u32, String, u64),
        ShardReady(u32),
        ShardDisconnect(u32),
        AllReady,
    }

    struct ChannelSink(mpsc::UnboundedSender<SinkCall>);

    impl EventSink for ChannelSink {
        fn on_dispatch(&self, shard: u32, event_name: &str, sequence: u64, _data: &Value) {
            let _ = self
                .0
                .send(SinkCall::Dispatch(shard, event_name.to_string(), sequence));
        }

        fn on_shard_ready(&self, shard: u32) {
            let _ = self.0.send(SinkCall::ShardReady(shard));
        }

        fn on_shard_disconnect(&self, shard: u32, _reason: &str) {
            let _ = self.0.send(SinkCall::ShardDisconnect(shard));
        }

        fn on_all_shards_ready(&self) {
            let _ = self.0.send(SinkCall::AllReady);
        }
    }

    struct Harness {
        coordinator: ShardCoordinator,
        connections: mpsc::UnboundedReceiver<ServerConnection>,
        calls: mpsc::UnboundedReceiver<SinkCall>,
    }

    impl Harness {
        fn new(shards: ShardCount, max_concurrency: Option<u32>) -> Self {
            Self::with_config(config(shards, max_concurrency))
        }

        fn with_config(config: CoordinatorConfig) -> Self {
            let (connector, connections) = ScriptedConnector::new();
            let (calls_tx, calls) = mpsc::unbounded_channel();
            let coordinator =
                ShardCoordinator::new(config, Arc::new(connector), Arc::new(ChannelSink(calls_tx)));

            Self {
                coordinator,
                connections,
                calls,
            }
        }

        /// Accepts a connection and waits for its identify.
        async fn accept(&mut self) -> (u32, ServerConnection) {
            let mut conn = self.connections.recv().await.unwrap();
            conn.hello(INTERVAL_MS);
            let identify = conn.expect_op(2).await;
            let index = u32::try_from(identify["d"]["shard"][0].as_u64().unwrap()).unwrap();
            (index, conn)
        }

        async fn wait_for(&mut self, call: SinkCall) {
            while self.calls.recv().await.unwrap() != call {}
        }
    }

    fn config(shards: ShardCount, max_concurrency: Option<u32>) -> CoordinatorConfig {
        let mut shard = ShardConfig::new(AuthToken::new_unchecked("test-token"));
        shard.gateway_url = "wss://gateway.example".to_string();
        let mut config = CoordinatorConfig::new(shard);
        config.shards = shards;
        config.max_concurrency = max_concurrency;
        config
    }

    fn gateway_info(shards: u32, max_concurrency: u32) -> GatewayBotInfo {
        GatewayBotInfo {
            url: "wss://gateway.mock".to_string(),
            shards,
            session_start_limit: SessionStartLimit {
                total: 1000,
                remaining: 999,
                reset_after: Duration::from_secs(3600),
                max_concurrency,
            },
        }
    }

    #[test]
    fn test_readiness_announces_once() {
        let mut readiness = Readiness::new(2);
        assert!(!readiness.mark_ready(0));
        assert!(!readiness.mark_ready(0));
        assert!(readiness.mark_ready(1));
        assert!(!readiness.mark_ready(1));
        assert!(!readiness.mark_ready(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifies_share_window_and_all_ready_fires_once() {
        let mut harness = Harness::new(ShardCount::Fixed(2), Some(1));
        harness.coordinator.start().await.unwrap();

        let started = Instant::now();
        let (first_index, first) = harness.accept().await;
        let (second_index, second) = harness.accept().await;
        assert!(Instant::now() - started >= IDENTIFY_WINDOW);
        assert_ne!(first_index, second_index);

        first.ready(1, "first");
        second.ready(1, "second");
        harness.wait_for(SinkCall::AllReady).await;

        first.close(4000, "");
        let mut first = harness.connections.recv().await.unwrap();
        first.hello(INTERVAL_MS);
        first.expect_op(6).await;
        first.dispatch("RESUMED", 2, json!({}));
        harness.wait_for(SinkCall::ShardReady(first_index)).await;

        second.dispatch("PING", 2, json!({}));
        harness
            .wait_for(SinkCall::Dispatch(second_index, "PING".to_string(), 2))
            .await;
        while let Ok(call) = harness.calls.try_recv() {
            assert_ne!(call, SinkCall::AllReady);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_shard_count_from_gateway_info() {
        let mut info = MockGatewayInfoPort::new();
        info.expect_fetch_gateway_info()
            .times(1)
            .returning(|| Ok(gateway_info(3, 3)));

        let mut harness = Harness::new(ShardCount::Auto, None);
        harness.coordinator = harness.coordinator.with_gateway_info(Arc::new(info));
        harness.coordinator.start().await.unwrap();
        assert_eq!(harness.coordinator.total_shards(), Some(3));

        let started = Instant::now();
        for _ in 0..3 {
            let (_, conn) = harness.accept().await;
            assert!(conn.url.starts_with("wss://gateway.mock/"));
        }
        assert!(Instant::now() - started < IDENTIFY_WINDOW);
    }

    #[tokio::test]
    async fn test_auto_without_gateway_info_is_rejected() {
        let mut harness = Harness::new(ShardCount::Auto, Some(1));
        let result = harness.coordinator.start().await;
        assert!(matches!(result, Err(GatewayError::InvalidShard { .. })));
    }

    #[tokio::test]
    async fn test_rejected_token_while_fetching_info_is_fatal() {
        let mut info = MockGatewayInfoPort::new();
        info.expect_fetch_gateway_info()
            .returning(|| Err(GatewayInfoError::unauthorized("401: Unauthorized")));

        let mut harness = Harness::new(ShardCount::Auto, None);
        harness.coordinator = harness.coordinator.with_gateway_info(Arc::new(info));
        let result = harness.coordinator.start().await;
        assert!(result.as_ref().is_err_and(GatewayError::is_fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_are_routed_by_guild() {
        let mut harness = Harness::new(ShardCount::Fixed(2), Some(2));
        harness.coordinator.start().await.unwrap();

        let mut conns = Vec::new();
        for _ in 0..2 {
            conns.push(harness.accept().await);
        }
        conns.sort_by_key(|(index, _)| *index);
        for (index, conn) in &conns {
            conn.ready(1, &format!("session-{index}"));
        }
        harness.wait_for(SinkCall::AllReady).await;

        let request = RequestGuildMembers::all("81384788769906688").with_nonce("n");
        harness.coordinator.request_guild_members(&request).await.unwrap();
        let sent = conns[1].1.expect_op(8).await;
        assert_eq!(sent["d"]["guild_id"], json!("81384788769906688"));

        let heartbeat = harness.coordinator.send(0, Envelope::heartbeat(None)).await;
        assert!(matches!(heartbeat, Err(GatewayError::ProtocolViolation { .. })));

        let presence = Envelope::presence_update(&PresenceUpdate::default()).unwrap();
        let missing = harness.coordinator.send(5, presence).await;
        assert!(matches!(missing, Err(GatewayError::InvalidShard { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_shard_error_stops_every_shard() {
        let mut harness = Harness::new(ShardCount::Fixed(2), Some(2));
        harness.coordinator.start().await.unwrap();

        let (_, failing) = harness.accept().await;
        let (_, mut healthy) = harness.accept().await;
        healthy.ready(1, "healthy");
        failing.close(4004, "Authentication failed.");

        let result = harness.coordinator.join().await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed { .. })));
        assert_eq!(healthy.expect_close().await, Some(1000));
        assert!(harness.coordinator.snapshots().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reshard_replaces_shard_set() {
        let mut harness = Harness::new(ShardCount::Fixed(1), Some(1));
        harness.coordinator.start().await.unwrap();
        let (_, mut old) = harness.accept().await;
        old.ready(1, "old");
        harness.wait_for(SinkCall::AllReady).await;

        harness.coordinator.reshard(ShardCount::Fixed(2)).await.unwrap();
        assert_eq!(old.expect_close().await, Some(1000));
        assert_eq!(harness.coordinator.total_shards(), Some(2));

        let (a, first) = harness.accept().await;
        let (b, second) = harness.accept().await;
        assert_eq!(a + b, 1);
        first.ready(1, "a");
        second.ready(1, "b");
        harness.wait_for(SinkCall::AllReady).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reshard_keeps_identify_window() {
        let mut harness = Harness::new(ShardCount::Fixed(1), Some(1));
        harness.coordinator.start().await.unwrap();
        let (_, old) = harness.accept().await;
        let first_identify = Instant::now();
        old.ready(1, "old");
        harness.wait_for(SinkCall::AllReady).await;

        harness.coordinator.reshard(ShardCount::Fixed(1)).await.unwrap();
        let (_, new) = harness.accept().await;
        assert!(Instant::now() - first_identify >= IDENTIFY_WINDOW);

        new.ready(1, "new");
        harness.wait_for(SinkCall::AllReady).await;
    }

    #[tokio::test]
    async fn test_zero_shard_count_is_rejected() {
        let mut harness = Harness::new(ShardCount::Fixed(0), Some(1));
        let result = harness.coordinator.start().await;
        assert!(matches!(result, Err(GatewayError::InvalidShard { .. })));
        assert_eq!(harness.coordinator.total_shards(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_backlog_longer_than_wait_budget_requeues() {
        let mut config = config(ShardCount::Fixed(3), Some(1));
        config.shard.identify_wait = IDENTIFY_WINDOW + Duration::from_secs(1);
        config.shard.max_reconnect_attempts = 0;
        let mut harness = Harness::with_config(config);
        harness.coordinator.start().await.unwrap();

        let started = Instant::now();
        let mut conns = Vec::new();
        for _ in 0..3 {
            let conn = harness.connections.recv().await.unwrap();
            conn.hello(INTERVAL_MS);
            conns.push(conn);
        }
        for conn in &mut conns {
            conn.expect_op(2).await;
        }
        assert!(Instant::now() - started >= IDENTIFY_WINDOW * 2);
        assert!(harness.connections.try_recv().is_err());

        for (index, conn) in conns.iter().enumerate() {
            conn.ready(1, &format!("session-{index}"));
        }
        harness.wait_for(SinkCall::AllReady).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_sessions() {
        let mut harness = Harness::new(ShardCount::Fixed(1), Some(1));
        harness.coordinator.start().await.unwrap();
        let (index, mut conn) = harness.accept().await;
        conn.ready(1, "abc");
        harness.wait_for(SinkCall::ShardReady(index)).await;

        let token = harness.coordinator.shutdown_token();
        harness.coordinator.shutdown().await.unwrap();
        assert!(token.is_cancelled());
        assert_eq!(conn.expect_close().await, Some(1000));
        harness.wait_for(SinkCall::ShardDisconnect(index)).await;
        assert!(matches!(
            harness.coordinator.start().await,
            Err(GatewayError::ShuttingDown)
        ));
    }
}
