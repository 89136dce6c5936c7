//! Lifecycle of one gateway connection: handshake, heartbeat, dispatch
//! routing, and reconnecting with resume when the session allows it.

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::backoff::{Backoff, random_delay};
use super::codec::{EnvelopeCodec, Frame};
use super::connection::{GatewayTransport, TransportConnector};
use super::constants::{
    CLOSE_CODE_NORMAL, CLOSE_CODE_RESUMABLE, DEFAULT_GATEWAY_URL, GatewayOpcode,
    HANDSHAKE_TIMEOUT, HELLO_TIMEOUT, IDENTIFY_WAIT_BUDGET, INVALID_SESSION_DELAY_MAX,
    INVALID_SESSION_DELAY_MIN, Intents, LARGE_THRESHOLD, MAX_NOT_AUTHENTICATED_CLOSES,
    MAX_RECONNECT_ATTEMPTS, gateway_connect_url,
};
use super::error::{DecodeError, GatewayCloseCode, GatewayError, GatewayResult};
use super::events::ShardEvent;
use super::heartbeat::{HeartbeatSignal, HeartbeatTask};
use super::identify_queue::{IdentifyGrant, IdentifyQueue};
use super::payloads::{Envelope, HelloPayload, IdentifyData, PresenceUpdate, ReadyPayload};
use super::state::{ShardSnapshot, ShardState, ShardStatus};
use crate::domain::entities::{AuthToken, ShardDescriptor};

const COMMAND_BUFFER: usize = 64;
const HEARTBEAT_SIGNAL_BUFFER: usize = 4;

type PermitFuture = Pin<Box<dyn Future<Output = GatewayResult<IdentifyGrant>> + Send>>;

/// Settings shared by every shard of a set.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub token: AuthToken,
    pub intents: Intents,
    pub compress: bool,
    pub gateway_url: String,
    pub large_threshold: u8,
    pub presence: Option<PresenceUpdate>,
    pub max_reconnect_attempts: u32,
    pub emit_raw: bool,
    pub hello_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Loss deadline for a single heartbeat. `None` waits for the next beat.
    pub heartbeat_ack_timeout: Option<Duration>,
    pub identify_wait: Duration,
}

impl ShardConfig {
    #[must_use]
    pub fn new(token: AuthToken) -> Self {
        Self {
            token,
            intents: Intents::default(),
            compress: false,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            large_threshold: LARGE_THRESHOLD,
            presence: None,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            emit_raw: false,
            hello_timeout: HELLO_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            heartbeat_ack_timeout: None,
            identify_wait: IDENTIFY_WAIT_BUDGET,
        }
    }
}

/// How a connection ended.
#[derive(Debug)]
enum Disconnect {
    Shutdown,
    /// Reconnect right away, keeping the session.
    Immediate { reason: String },
    /// Reconnect after a fixed pause that does not count against the budget.
    After { reason: String, delay: Duration },
    Failed(GatewayError),
}

/// Per-connection bookkeeping. Dropping it stops the heartbeat task.
struct ConnectionContext {
    heartbeat_signals: mpsc::Sender<HeartbeatSignal>,
    heartbeat_cancel: CancellationToken,
    heartbeat_task: Option<JoinHandle<()>>,
    permit: Option<PermitFuture>,
    deadline: Option<Instant>,
    handshake_sent: bool,
    shutdown_pending: bool,
}

impl ConnectionContext {
    fn new(heartbeat_signals: mpsc::Sender<HeartbeatSignal>, hello_deadline: Instant) -> Self {
        Self {
            heartbeat_signals,
            heartbeat_cancel: CancellationToken::new(),
            heartbeat_task: None,
            permit: None,
            deadline: Some(hello_deadline),
            handshake_sent: false,
            shutdown_pending: false,
        }
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.heartbeat_cancel.cancel();
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
    }
}

/// Coordinator-side view of a running shard.
#[derive(Debug, Clone)]
pub struct ShardHandle {
    descriptor: ShardDescriptor,
    state: Arc<Mutex<ShardState>>,
    commands: mpsc::Sender<Envelope>,
}

impl ShardHandle {
    #[must_use]
    pub const fn descriptor(&self) -> ShardDescriptor {
        self.descriptor
    }

    #[must_use]
    pub fn status(&self) -> ShardStatus {
        self.state.lock().status()
    }

    #[must_use]
    pub fn snapshot(&self) -> ShardSnapshot {
        ShardSnapshot::capture(self.descriptor.index(), &self.state.lock())
    }

    /// Queues an outbound command. It is sent once the shard is ready.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ChannelClosed` if the shard has stopped.
    pub async fn send(&self, envelope: Envelope) -> GatewayResult<()> {
        self.commands
            .send(envelope)
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

pub struct Shard {
    descriptor: ShardDescriptor,
    config: Arc<ShardConfig>,
    connector: Arc<dyn TransportConnector>,
    identify: IdentifyQueue,
    state: Arc<Mutex<ShardState>>,
    events: mpsc::UnboundedSender<ShardEvent>,
    commands: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
    backoff: Backoff,
    not_authenticated_closes: u32,
}

impl Shard {
    #[must_use]
    pub fn new(
        descriptor: ShardDescriptor,
        config: Arc<ShardConfig>,
        connector: Arc<dyn TransportConnector>,
        identify: IdentifyQueue,
        events: mpsc::UnboundedSender<ShardEvent>,
        shutdown: CancellationToken,
    ) -> (Self, ShardHandle) {
        let state = Arc::new(Mutex::new(ShardState::new()));
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);

        let handle = ShardHandle {
            descriptor,
            state: Arc::clone(&state),
            commands: commands_tx,
        };

        let shard = Self {
            descriptor,
            config,
            connector,
            identify,
            state,
            events,
            commands,
            shutdown,
            backoff: Backoff::default(),
            not_authenticated_closes: 0,
        };

        (shard, handle)
    }

    /// Runs until shutdown or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the shard: an authentication
    /// failure, a fatal close code, or an exhausted reconnect budget.
    pub async fn run(mut self) -> GatewayResult<()> {
        info!(shard = %self.descriptor, "Starting shard");

        let result = self.run_loop().await;
        let _ = self.state.lock().transition(ShardStatus::Disconnected);

        match &result {
            Ok(()) => info!(shard = %self.descriptor, "Shard stopped"),
            Err(e) => error!(shard = %self.descriptor, error = %e, "Shard stopped"),
        }
        result
    }

    async fn run_loop(&mut self) -> GatewayResult<()> {
        let shard = self.descriptor.index();

        loop {
            let (reason, delay) = match self.run_connection().await {
                Disconnect::Shutdown => {
                    self.report_disconnect("shutdown".to_string());
                    return Ok(());
                }
                Disconnect::Immediate { reason } => (reason, Duration::ZERO),
                Disconnect::After { reason, delay } => (reason, delay),
                Disconnect::Failed(error) => {
                    let error = self.classify(error);
                    if error.is_fatal() {
                        return Err(self.fail(error));
                    }
                    if self.shutdown.is_cancelled() {
                        self.report_disconnect(error.to_string());
                        return Ok(());
                    }
                    if !error.can_resume() {
                        self.state.lock().session_mut().reset();
                    }

                    let attempt = self.state.lock().record_reconnect_attempt();
                    if attempt > self.config.max_reconnect_attempts {
                        return Err(self.fail(GatewayError::ReconnectionLimitExceeded {
                            attempts: self.config.max_reconnect_attempts,
                        }));
                    }

                    let delay = self.backoff.next_delay();
                    warn!(
                        shard,
                        error = %error,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Connection lost"
                    );
                    (error.to_string(), delay)
                }
            };

            self.report_disconnect(reason);
            let attempt = self.state.lock().reconnect_attempts();
            self.emit(ShardEvent::Reconnecting {
                shard,
                attempt,
                delay,
            });

            if !delay.is_zero() {
                tokio::select! {
                    () = self.shutdown.cancelled() => return Ok(()),
                    () = sleep(delay) => {}
                }
            }
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
        }
    }

    /// Repeated "not authenticated" closes mean the token is not accepted.
    fn classify(&mut self, error: GatewayError) -> GatewayError {
        if error.close_code() == Some(GatewayCloseCode::NotAuthenticated.into()) {
            self.not_authenticated_closes += 1;
            if self.not_authenticated_closes >= MAX_NOT_AUTHENTICATED_CLOSES {
                return GatewayError::auth_failed("gateway kept rejecting the session as not authenticated");
            }
        }
        error
    }

    fn fail(&self, error: GatewayError) -> GatewayError {
        let shard = self.descriptor.index();
        self.state.lock().session_mut().reset();
        self.report_disconnect(error.to_string());
        self.emit(ShardEvent::Fatal {
            shard,
            message: error.to_string(),
        });
        error
    }

    fn report_disconnect(&self, reason: String) {
        let can_resume = {
            let mut state = self.state.lock();
            let _ = state.transition(ShardStatus::Disconnected);
            state.session().can_resume()
        };
        self.emit(ShardEvent::Disconnected {
            shard: self.descriptor.index(),
            reason,
            can_resume,
        });
    }

    async fn run_connection(&mut self) -> Disconnect {
        let shard = self.descriptor.index();
        let url = {
            let mut state = self.state.lock();
            if let Err(error) = state.transition(ShardStatus::Connecting) {
                return Disconnect::Failed(error);
            }
            let session = state.session();
            let base = session
                .resume_url()
                .filter(|_| session.can_resume())
                .unwrap_or(self.config.gateway_url.as_str());
            gateway_connect_url(base, self.config.compress)
        };

        debug!(shard, url, "Connecting to gateway");
        let connected = tokio::select! {
            () = self.shutdown.cancelled() => return Disconnect::Shutdown,
            result = self.connector.connect(&url) => result,
        };
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(error) => return Disconnect::Failed(error),
        };

        if let Err(error) = self.state.lock().transition(ShardStatus::AwaitingHello) {
            return Disconnect::Failed(error);
        }
        info!(shard, "Connected, awaiting hello");

        let outcome = match self.drive(transport.as_mut()).await {
            Ok(disconnect) => disconnect,
            Err(error) => Disconnect::Failed(error),
        };

        let code = if matches!(outcome, Disconnect::Shutdown) {
            CLOSE_CODE_NORMAL
        } else {
            CLOSE_CODE_RESUMABLE
        };
        if let Err(e) = transport.close(code).await {
            debug!(shard, error = %e, "Error while closing transport");
        }

        outcome
    }

    async fn drive(&mut self, transport: &mut dyn GatewayTransport) -> GatewayResult<Disconnect> {
        let shard = self.descriptor.index();
        let mut codec = EnvelopeCodec::new(self.config.compress);
        let (heartbeat_signals, mut heartbeat_rx) = mpsc::channel(HEARTBEAT_SIGNAL_BUFFER);
        let mut ctx =
            ConnectionContext::new(heartbeat_signals, Instant::now() + self.config.hello_timeout);

        loop {
            let status = self.state.lock().status();
            let resume_in_flight = status == ShardStatus::Resuming && ctx.handshake_sent;
            if ctx.shutdown_pending && !resume_in_flight {
                return Ok(self.begin_shutdown());
            }

            tokio::select! {
                () = self.shutdown.cancelled(), if !ctx.shutdown_pending => {
                    if resume_in_flight {
                        debug!(shard, "Shutdown requested during resume, waiting for the result");
                    }
                    ctx.shutdown_pending = true;
                }
                Some(signal) = heartbeat_rx.recv() => match signal {
                    HeartbeatSignal::Beat(envelope) => self.send(transport, &envelope).await?,
                    HeartbeatSignal::Lost => return Err(GatewayError::HeartbeatTimeout),
                },
                grant = wait_for_grant(&mut ctx.permit) => {
                    ctx.permit = None;
                    match grant {
                        Ok(grant) => {
                            self.send_handshake(transport, grant).await?;
                            ctx.handshake_sent = true;
                            ctx.deadline = Some(Instant::now() + self.config.handshake_timeout);
                        }
                        Err(GatewayError::RateLimited { waited }) => {
                            warn!(shard, waited_ms = waited.as_millis(), "Identify queue is backed up, requeueing");
                            ctx.permit = Some(self.request_permit(Duration::ZERO));
                        }
                        Err(error) => return Err(error),
                    }
                }
                () = sleep_until_deadline(ctx.deadline) => {
                    let operation = if status == ShardStatus::AwaitingHello {
                        "hello"
                    } else {
                        "handshake response"
                    };
                    warn!(shard, status = %status, "Timed out waiting for {operation}");
                    return Err(GatewayError::timeout(operation));
                }
                Some(envelope) = self.commands.recv(), if status.is_ready() => {
                    debug!(shard, op = envelope.opcode, "Sending gateway command");
                    self.send(transport, &envelope).await?;
                }
                frame = transport.receive() => {
                    let Some(envelope) = self.decode(&mut codec, frame?)? else {
                        continue;
                    };
                    if let Some(disconnect) = self.handle_envelope(transport, envelope, &mut ctx).await? {
                        return Ok(disconnect);
                    }
                }
            }
        }
    }

    fn begin_shutdown(&self) -> Disconnect {
        info!(shard = self.descriptor.index(), "Closing connection for shutdown");
        let mut state = self.state.lock();
        let _ = state.transition(ShardStatus::ShuttingDown);
        state.session_mut().reset();
        Disconnect::Shutdown
    }

    fn decode(&self, codec: &mut EnvelopeCodec, frame: Frame) -> GatewayResult<Option<Envelope>> {
        trace!(shard = self.descriptor.index(), bytes = frame.len(), "Received frame");
        match codec.decode(frame) {
            Ok(envelope) => Ok(envelope),
            Err(error) if error.poisons_stream() => Err(error.into()),
            Err(error) => {
                warn!(shard = self.descriptor.index(), error = %error, "Dropping undecodable frame");
                Ok(None)
            }
        }
    }

    async fn send(
        &self,
        transport: &mut dyn GatewayTransport,
        envelope: &Envelope,
    ) -> GatewayResult<()> {
        let frame = EnvelopeCodec::encode(envelope)?;
        trace!(
            shard = self.descriptor.index(),
            op = envelope.opcode,
            bytes = frame.len(),
            "Sending envelope"
        );
        transport.send(frame).await
    }

    fn emit(&self, event: ShardEvent) {
        if self.events.send(event).is_err() {
            trace!(shard = self.descriptor.index(), "Event receiver dropped");
        }
    }

    fn request_permit(&self, delay: Duration) -> PermitFuture {
        let queue = self.identify.clone();
        let descriptor = self.descriptor;
        let budget = self.config.identify_wait;

        Box::pin(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            queue.acquire(&descriptor, budget).await
        })
    }

    fn identify_envelope(&self) -> GatewayResult<Envelope> {
        let mut identify = IdentifyData::new(
            self.config.token.as_str(),
            self.descriptor.identify_pair(),
            self.config.intents,
            self.config.large_threshold,
        );
        identify.presence.clone_from(&self.config.presence);
        Envelope::identify(&identify)
    }

    async fn send_handshake(
        &self,
        transport: &mut dyn GatewayTransport,
        grant: IdentifyGrant,
    ) -> GatewayResult<()> {
        let shard = self.descriptor.index();
        let resume = {
            let mut state = self.state.lock();
            let resuming = state.status() == ShardStatus::Resuming;
            if resuming && state.session_mut().record_resume_attempt() {
                let session = state.session();
                session
                    .session_id()
                    .map(|id| (id.to_owned(), session.last_sequence().unwrap_or_default()))
            } else {
                if resuming {
                    state.session_mut().reset();
                    state.transition(ShardStatus::Identifying)?;
                }
                None
            }
        };

        let envelope = match &resume {
            Some((session_id, sequence)) => {
                info!(shard, session_id, sequence, bucket = grant.bucket(), "Resuming session");
                Envelope::resume(self.config.token.as_str(), session_id, *sequence)?
            }
            None => {
                info!(shard, bucket = grant.bucket(), "Identifying");
                self.identify_envelope()?
            }
        };
        self.send(transport, &envelope).await
    }

    async fn handle_envelope(
        &mut self,
        transport: &mut dyn GatewayTransport,
        envelope: Envelope,
        ctx: &mut ConnectionContext,
    ) -> GatewayResult<Option<Disconnect>> {
        let shard = self.descriptor.index();
        if self.config.emit_raw {
            self.emit(ShardEvent::Raw {
                shard,
                envelope: envelope.clone(),
            });
        }

        let Some(opcode) = envelope.kind() else {
            debug!(shard, op = envelope.opcode, "Ignoring unknown opcode");
            return Ok(None);
        };

        match opcode {
            GatewayOpcode::Dispatch => self.handle_dispatch(envelope, ctx)?,
            GatewayOpcode::Hello => self.handle_hello(&envelope, ctx)?,
            GatewayOpcode::HeartbeatAck => {
                let latency = self.state.lock().heartbeat_mut().on_ack(Instant::now());
                if let Some(latency) = latency {
                    debug!(shard, latency_ms = latency.as_millis(), "Heartbeat acknowledged");
                    self.emit(ShardEvent::HeartbeatAck { shard, latency });
                }
            }
            GatewayOpcode::Heartbeat => {
                let sequence = {
                    let mut state = self.state.lock();
                    let accepted = state.heartbeat_mut().request_beat(Instant::now());
                    accepted.then(|| state.session().last_sequence())
                };
                match sequence {
                    Some(sequence) => {
                        debug!(shard, "Gateway requested a heartbeat");
                        self.send(transport, &Envelope::heartbeat(sequence)).await?;
                    }
                    None => debug!(shard, "Heartbeat requested while one is in flight"),
                }
            }
            GatewayOpcode::InvalidSession => return self.handle_invalid_session(&envelope, ctx),
            GatewayOpcode::Reconnect => {
                info!(shard, "Gateway requested reconnect");
                return Ok(Some(Disconnect::Immediate {
                    reason: "gateway requested reconnect".to_string(),
                }));
            }
            GatewayOpcode::Identify
            | GatewayOpcode::PresenceUpdate
            | GatewayOpcode::VoiceStateUpdate
            | GatewayOpcode::Resume
            | GatewayOpcode::RequestGuildMembers => {
                let state = self.state.lock().status().to_string();
                return Err(GatewayError::UnexpectedOpcode {
                    opcode: Some(opcode),
                    state,
                });
            }
        }

        Ok(None)
    }

    fn handle_hello(&self, envelope: &Envelope, ctx: &mut ConnectionContext) -> GatewayResult<()> {
        let shard = self.descriptor.index();
        let hello: HelloPayload = serde_json::from_value(envelope.data.clone())
            .map_err(|e| DecodeError::malformed(format!("hello: {e}")))?;
        let interval = Duration::from_millis(hello.heartbeat_interval);
        if interval.is_zero() {
            return Err(GatewayError::protocol("hello announced a zero heartbeat interval"));
        }

        let resuming = {
            let mut state = self.state.lock();
            if state.status() != ShardStatus::AwaitingHello {
                return Err(GatewayError::UnexpectedOpcode {
                    opcode: Some(GatewayOpcode::Hello),
                    state: state.status().to_string(),
                });
            }
            state.heartbeat_mut().arm(interval);
            let resuming = state.session().can_resume();
            state.transition(if resuming {
                ShardStatus::Resuming
            } else {
                ShardStatus::Identifying
            })?;
            resuming
        };
        info!(shard, interval_ms = hello.heartbeat_interval, resuming, "Received hello");

        ctx.heartbeat_task = Some(
            HeartbeatTask::new(
                Arc::clone(&self.state),
                ctx.heartbeat_signals.clone(),
                ctx.heartbeat_cancel.clone(),
            )
            .with_ack_timeout(self.config.heartbeat_ack_timeout)
            .start(),
        );
        ctx.deadline = None;
        ctx.permit = Some(self.request_permit(Duration::ZERO));
        Ok(())
    }

    fn handle_dispatch(&mut self, envelope: Envelope, ctx: &mut ConnectionContext) -> GatewayResult<()> {
        let shard = self.descriptor.index();
        let Envelope {
            sequence,
            event_name,
            data,
            ..
        } = envelope;
        let (Some(sequence), Some(event_name)) = (sequence, event_name) else {
            warn!(shard, "Dropping dispatch without sequence");
            return Ok(());
        };

        if !self.state.lock().session_mut().apply_dispatch(sequence).is_applied() {
            return Ok(());
        }

        match event_name.as_str() {
            "READY" => {
                let ready: ReadyPayload = serde_json::from_value(data.clone())
                    .map_err(|e| DecodeError::malformed(format!("READY: {e}")))?;
                {
                    let mut state = self.state.lock();
                    state
                        .session_mut()
                        .establish(ready.session_id.clone(), ready.resume_gateway_url);
                    state.transition(ShardStatus::Ready)?;
                }
                self.mark_ready(ctx);
                info!(shard, session_id = %ready.session_id, "Shard ready");
                self.emit(ShardEvent::Ready {
                    shard,
                    session_id: ready.session_id,
                });
            }
            "RESUMED" => {
                {
                    let mut state = self.state.lock();
                    state.transition(ShardStatus::Ready)?;
                    state.session_mut().resumed();
                }
                self.mark_ready(ctx);
                info!(shard, sequence, "Session resumed");
                self.emit(ShardEvent::Resumed { shard });
            }
            _ => debug!(shard, sequence, event = %event_name, "Dispatch"),
        }

        self.emit(ShardEvent::Dispatch {
            shard,
            event_name,
            sequence,
            data,
        });
        Ok(())
    }

    fn mark_ready(&mut self, ctx: &mut ConnectionContext) {
        ctx.deadline = None;
        ctx.handshake_sent = false;
        self.backoff.reset();
        self.not_authenticated_closes = 0;
    }

    fn handle_invalid_session(
        &self,
        envelope: &Envelope,
        ctx: &mut ConnectionContext,
    ) -> GatewayResult<Option<Disconnect>> {
        let shard = self.descriptor.index();
        let resumable = envelope.data.as_bool().unwrap_or(false);
        let delay = random_delay(INVALID_SESSION_DELAY_MIN, INVALID_SESSION_DELAY_MAX);

        let mut state = self.state.lock();
        if resumable && state.session().can_resume() {
            state.transition(ShardStatus::Resuming)?;
            drop(state);
            warn!(shard, delay_ms = delay.as_millis(), "Session invalidated, retrying resume");

            ctx.handshake_sent = false;
            ctx.deadline = None;
            ctx.permit = Some(self.request_permit(delay));
            return Ok(None);
        }

        state.session_mut().reset();
        drop(state);
        warn!(shard, resumable, delay_ms = delay.as_millis(), "Session invalidated, starting over");

        Ok(Some(Disconnect::After {
            reason: "session invalidated".to_string(),
            delay,
        }))
    }
}

async fn wait_for_grant(permit: &mut Option<PermitFuture>) -> GatewayResult<IdentifyGrant> {
    match permit {
        Some(permit) => permit.await,
        None => pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
