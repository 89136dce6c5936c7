use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::payloads::Envelope;
use super::state::ShardState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatPhase {
    #[default]
    Idle,
    Armed,
    AwaitingAck,
    /// Terminal. The connection is considered dead.
    Lost,
}

/// What the driver should do when a deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Send,
    Lost,
    Wait,
}

/// Ack-tracking state machine for one connection.
///
/// At most one heartbeat is in flight: a send deadline that elapses while the
/// previous beat is unacknowledged moves the monitor to [`HeartbeatPhase::Lost`]
/// instead of sending again.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMonitor {
    phase: HeartbeatPhase,
    interval: Option<Duration>,
    last_sent_at: Option<Instant>,
    last_ack_at: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: HeartbeatPhase::Idle,
            interval: None,
            last_sent_at: None,
            last_ack_at: None,
            latency: None,
        }
    }

    /// Arms an idle monitor with the interval announced by the peer.
    pub fn arm(&mut self, interval: Duration) -> bool {
        if self.phase != HeartbeatPhase::Idle {
            warn!(phase = ?self.phase, "Heartbeat monitor already armed");
            return false;
        }
        self.interval = Some(interval);
        self.phase = HeartbeatPhase::Armed;
        true
    }

    /// Delay before the first beat, `interval * jitter` with `jitter` in `[0, 1)`.
    #[must_use]
    pub fn first_beat_delay(&self, jitter: f64) -> Option<Duration> {
        self.interval
            .map(|interval| interval.mul_f64(jitter.clamp(0.0, 1.0)))
    }

    pub fn on_deadline(&mut self, now: Instant) -> HeartbeatAction {
        match self.phase {
            HeartbeatPhase::Armed => {
                self.phase = HeartbeatPhase::AwaitingAck;
                self.last_sent_at = Some(now);
                HeartbeatAction::Send
            }
            HeartbeatPhase::AwaitingAck => {
                self.phase = HeartbeatPhase::Lost;
                HeartbeatAction::Lost
            }
            HeartbeatPhase::Idle | HeartbeatPhase::Lost => HeartbeatAction::Wait,
        }
    }

    /// Sends out of schedule when the peer asks for a beat. Refused while
    /// another beat is in flight.
    pub fn request_beat(&mut self, now: Instant) -> bool {
        if self.phase != HeartbeatPhase::Armed {
            return false;
        }
        self.on_deadline(now) == HeartbeatAction::Send
    }

    /// Records an ack and returns the round-trip latency of the beat it answers.
    pub fn on_ack(&mut self, now: Instant) -> Option<Duration> {
        if self.phase != HeartbeatPhase::AwaitingAck {
            debug!(phase = ?self.phase, "Unsolicited heartbeat ack");
            return None;
        }
        self.phase = HeartbeatPhase::Armed;
        self.last_ack_at = Some(now);
        self.latency = self
            .last_sent_at
            .map(|sent| now.saturating_duration_since(sent));
        self.latency
    }

    /// Declares the pending beat lost when a dedicated ack timeout elapses.
    pub fn expire_ack(&mut self) -> bool {
        if self.phase == HeartbeatPhase::AwaitingAck {
            self.phase = HeartbeatPhase::Lost;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub const fn phase(&self) -> HeartbeatPhase {
        self.phase
    }

    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    #[must_use]
    pub const fn is_ack_pending(&self) -> bool {
        matches!(self.phase, HeartbeatPhase::AwaitingAck)
    }

    #[must_use]
    pub const fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    #[must_use]
    pub const fn last_ack_at(&self) -> Option<Instant> {
        self.last_ack_at
    }

    #[must_use]
    pub const fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

/// Messages from the heartbeat task to its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatSignal {
    Beat(Envelope),
    Lost,
}

/// Drives a [`HeartbeatMonitor`] held inside the shard state.
pub struct HeartbeatTask {
    state: Arc<Mutex<ShardState>>,
    signals: mpsc::Sender<HeartbeatSignal>,
    cancel: CancellationToken,
    ack_timeout: Option<Duration>,
}

impl HeartbeatTask {
    #[must_use]
    pub const fn new(
        state: Arc<Mutex<ShardState>>,
        signals: mpsc::Sender<HeartbeatSignal>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            signals,
            cancel,
            ack_timeout: None,
        }
    }

    /// Declares a beat lost after `timeout` instead of at the next send deadline.
    /// Ignored when not shorter than the interval.
    #[must_use]
    pub const fn with_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Starts beating with a random first-beat jitter.
    #[must_use]
    pub fn start(self) -> JoinHandle<()> {
        self.start_with_jitter(rand::random::<f64>())
    }

    #[must_use]
    pub fn start_with_jitter(self, jitter: f64) -> JoinHandle<()> {
        tokio::spawn(self.run(jitter))
    }

    async fn run(self, jitter: f64) {
        let (interval, first_delay) = {
            let state = self.state.lock();
            let monitor = state.heartbeat();
            match (monitor.interval(), monitor.first_beat_delay(jitter)) {
                (Some(interval), Some(delay)) => (interval, delay),
                _ => {
                    warn!("Heartbeat task started before the monitor was armed");
                    return;
                }
            }
        };
        let ack_timeout = self.ack_timeout.filter(|timeout| *timeout < interval);

        debug!(
            interval_ms = interval.as_millis(),
            first_delay_ms = first_delay.as_millis(),
            "Heartbeat scheduled"
        );

        let mut next_beat = Instant::now() + first_delay;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep_until(next_beat) => {}
            }

            let (action, sequence) = {
                let mut state = self.state.lock();
                let action = state.heartbeat_mut().on_deadline(Instant::now());
                (action, state.session().last_sequence())
            };

            match action {
                HeartbeatAction::Send => {
                    if self
                        .signals
                        .send(HeartbeatSignal::Beat(Envelope::heartbeat(sequence)))
                        .await
                        .is_err()
                    {
                        debug!("Heartbeat channel closed");
                        break;
                    }
                    debug!(sequence = ?sequence, "Sent heartbeat");

                    if let Some(timeout) = ack_timeout {
                        tokio::select! {
                            () = self.cancel.cancelled() => break,
                            () = sleep_until(next_beat + timeout) => {}
                        }
                        if self.state.lock().heartbeat_mut().expire_ack() {
                            self.signal_lost().await;
                            break;
                        }
                    }
                    next_beat += interval;
                }
                HeartbeatAction::Lost => {
                    self.signal_lost().await;
                    break;
                }
                HeartbeatAction::Wait => {
                    if self.state.lock().heartbeat().phase() == HeartbeatPhase::Lost {
                        break;
                    }
                    next_beat += interval;
                }
            }
        }

        debug!("Heartbeat loop stopped");
    }

    async fn signal_lost(&self) {
        warn!("Heartbeat ACK not received, connection is dead");
        let _ = self.signals.send(HeartbeatSignal::Lost).await;
    }
}
