//! Live change stream consumption.
//!
//! The connection lifecycle is an explicit state machine
//! (`disconnected -> connecting -> streaming -> backoff -> connecting ...`)
//! with `aborted` reachable from anywhere and terminal.

mod consumer;

pub use consumer::LiveStreamConsumer;

use std::time::Duration;

use serde::Serialize;

/// Connection state of the change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff { attempt: u32, delay_ms: u64 },
    Aborted,
}

/// Reconnect delay policy: exponential, capped, with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Attempts beyond this no longer grow the delay
    pub max_exponent: u32,
    /// Upper bound of the random extra delay, as a fraction of the delay
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30000),
            max_exponent: 5,
            jitter_ratio: 0.15,
        }
    }
}

impl BackoffPolicy {
    /// `min(max, base * 2^min(attempt, max_exponent))`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(self.max_exponent));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay for `attempt` given a jitter sample in `0.0..=1.0`.
    ///
    /// Jitter is added before the cap. The cap is the plateau delay, which
    /// is `max` unless `base * 2^max_exponent` stays below it.
    pub fn delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let base = self.base_delay(attempt);
        let extra = base.mul_f64(self.jitter_ratio.max(0.0) * jitter_sample.clamp(0.0, 1.0));
        base.saturating_add(extra).min(self.plateau())
    }

    fn plateau(&self) -> Duration {
        self.base_delay(self.max_exponent)
    }
}

/// Transition functions of the stream lifecycle.
#[derive(Debug)]
pub struct StreamMachine {
    state: StreamState,
    attempt: u32,
}

impl Default for StreamMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMachine {
    pub fn new() -> Self {
        Self {
            state: StreamState::Disconnected,
            attempt: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Consecutive failures since the last received event.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_aborted(&self) -> bool {
        self.state == StreamState::Aborted
    }

    /// Begin (re)connecting. Returns `false` once aborted.
    pub fn connect(&mut self) -> bool {
        match self.state {
            StreamState::Aborted => false,
            _ => {
                self.state = StreamState::Connecting;
                true
            }
        }
    }

    pub fn opened(&mut self) {
        if self.state == StreamState::Connecting {
            self.state = StreamState::Streaming;
        }
    }

    /// An event was read: transient trouble is over.
    pub fn event_received(&mut self) {
        if self.state == StreamState::Streaming {
            self.attempt = 0;
        }
    }

    /// The connection failed or ended; enter backoff and return the delay.
    pub fn failed(&mut self, policy: &BackoffPolicy, jitter_sample: f64) -> Option<Duration> {
        if self.is_aborted() {
            return None;
        }
        let delay = policy.delay(self.attempt, jitter_sample);
        self.state = StreamState::Backoff {
            attempt: self.attempt,
            delay_ms: delay.as_millis() as u64,
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Connection dropped on purpose (e.g. for a resync).
    pub fn disconnected(&mut self) {
        if !self.is_aborted() {
            self.state = StreamState::Disconnected;
        }
    }

    /// Terminal. Safe to call any number of times.
    pub fn abort(&mut self) {
        self.state = StreamState::Aborted;
    }
}
