use tracing::{debug, warn};

use super::constants::MAX_RESUME_ATTEMPTS;

/// Result of applying a dispatch sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceUpdate {
    /// The sequence followed the previous one directly.
    Advanced,
    /// The sequence skipped ahead; it is applied but events may have been missed.
    Gap { expected: u64, received: u64 },
    /// A duplicate or regressed sequence. Ignored.
    Stale { last: u64, received: u64 },
}

impl SequenceUpdate {
    #[must_use]
    pub const fn is_applied(self) -> bool {
        !matches!(self, Self::Stale { .. })
    }
}

/// Resume state of one shard. Memory-resident only.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    session_id: Option<String>,
    resume_url: Option<String>,
    last_sequence: Option<u64>,
    resumable: bool,
    resume_attempts: u32,
}

impl SessionState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session_id: None,
            resume_url: None,
            last_sequence: None,
            resumable: false,
            resume_attempts: 0,
        }
    }

    /// Records the session granted by a successful identify.
    pub fn establish(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
        self.resumable = true;
        self.resume_attempts = 0;
    }

    pub fn apply_dispatch(&mut self, sequence: u64) -> SequenceUpdate {
        let update = match self.last_sequence {
            Some(last) if sequence <= last => SequenceUpdate::Stale {
                last,
                received: sequence,
            },
            Some(last) if sequence > last + 1 => SequenceUpdate::Gap {
                expected: last + 1,
                received: sequence,
            },
            _ => SequenceUpdate::Advanced,
        };

        match update {
            SequenceUpdate::Advanced => {}
            SequenceUpdate::Gap { expected, received } => {
                warn!(expected, received, "Dispatch sequence skipped ahead");
            }
            SequenceUpdate::Stale { last, received } => {
                debug!(last, received, "Ignoring out-of-order dispatch");
                return update;
            }
        }

        self.last_sequence = Some(sequence);
        update
    }

    pub const fn mark_resumable(&mut self, resumable: bool) {
        self.resumable = resumable;
    }

    /// Counts a resume attempt. Once the limit is exceeded the session is no
    /// longer resumable and `false` is returned.
    pub fn record_resume_attempt(&mut self) -> bool {
        self.resume_attempts += 1;
        if self.resume_attempts > MAX_RESUME_ATTEMPTS {
            warn!(
                attempts = self.resume_attempts,
                "Resume attempt limit exceeded, session discarded"
            );
            self.resumable = false;
        }
        self.resumable
    }

    /// Called once a resume has been acknowledged.
    pub const fn resumed(&mut self) {
        self.resume_attempts = 0;
    }

    /// Clears everything a fresh identify must not reuse.
    pub fn reset(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.last_sequence = None;
        self.resumable = false;
        self.resume_attempts = 0;
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    #[must_use]
    pub const fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    #[must_use]
    pub const fn resume_attempts(&self) -> u32 {
        self.resume_attempts
    }

    #[must_use]
    pub const fn can_resume(&self) -> bool {
        self.resumable && self.session_id.is_some()
    }
}
