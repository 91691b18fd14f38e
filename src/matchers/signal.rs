use super::tail;
use crate::timer::Deadline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    #[default]
    Pending,
    Positive,
    Negative,
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalState::Pending => "pending",
            SignalState::Positive => "positive",
            SignalState::Negative => "negative",
        })
    }
}

fn default_reset_delay_ms() -> u64 {
    5000
}

/// Bistable OK/FAIL indicator that falls back to pending after a quiet period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SignalRecord", from = "SignalRecord")]
pub struct SignalCounter {
    pub positive_pattern: String,
    pub negative_pattern: String,
    pub reset_delay_ms: u64,
    state: SignalState,
    pub last_transition_at: Option<DateTime<Utc>>,
    reset: Deadline,
}

/// Stored form of a [`SignalCounter`]. The state is written as it reads at
/// save time, and the reset timer is rebuilt from `last_transition_at`.
#[derive(Serialize, Deserialize)]
struct SignalRecord {
    positive_pattern: String,
    negative_pattern: String,
    #[serde(default = "default_reset_delay_ms")]
    reset_delay_ms: u64,
    #[serde(default)]
    state: SignalState,
    #[serde(default)]
    last_transition_at: Option<DateTime<Utc>>,
}

impl From<SignalCounter> for SignalRecord {
    fn from(signal: SignalCounter) -> Self {
        Self {
            state: signal.state(),
            positive_pattern: signal.positive_pattern,
            negative_pattern: signal.negative_pattern,
            reset_delay_ms: signal.reset_delay_ms,
            last_transition_at: signal.last_transition_at,
        }
    }
}

impl From<SignalRecord> for SignalCounter {
    fn from(record: SignalRecord) -> Self {
        let mut signal = Self {
            positive_pattern: record.positive_pattern,
            negative_pattern: record.negative_pattern,
            reset_delay_ms: record.reset_delay_ms,
            state: record.state,
            last_transition_at: record.last_transition_at,
            reset: Deadline::default(),
        };
        if signal.state != SignalState::Pending {
            let elapsed = signal
                .last_transition_at
                .and_then(|at| (Utc::now() - at).to_std().ok())
                .unwrap_or_default();
            match signal.reset_delay().checked_sub(elapsed) {
                Some(left) if !left.is_zero() => signal.reset.arm(left),
                _ => signal.state = SignalState::Pending,
            }
        }
        signal
    }
}

impl SignalCounter {
    pub fn new(positive: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            positive_pattern: positive.into(),
            negative_pattern: negative.into(),
            reset_delay_ms: default_reset_delay_ms(),
            state: SignalState::Pending,
            last_transition_at: None,
            reset: Deadline::default(),
        }
    }

    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }

    /// Current state. Reads as pending once the reset delay has passed.
    pub fn state(&self) -> SignalState {
        if self.reset.is_armed() && !self.reset.is_pending() {
            SignalState::Pending
        } else {
            self.state
        }
    }

    pub(super) fn update(&mut self, buffer: &mut String, chunk: &str) -> bool {
        if self.reset.take_expired() {
            self.state = SignalState::Pending;
        }
        let combined = format!("{buffer}{chunk}");
        let contains = |p: &str| !p.is_empty() && combined.contains(p);
        let next = if contains(&self.negative_pattern) {
            Some(SignalState::Negative)
        } else if contains(&self.positive_pattern) {
            Some(SignalState::Positive)
        } else {
            None
        };

        let longest = self
            .positive_pattern
            .chars()
            .count()
            .max(self.negative_pattern.chars().count());
        *buffer = tail(&combined, longest.saturating_sub(1));

        let Some(next) = next else {
            return false;
        };
        self.state = next;
        self.last_transition_at = Some(Utc::now());
        self.reset.cancel();
        self.reset.arm(self.reset_delay());
        true
    }

    pub(super) fn reset(&mut self) {
        self.state = SignalState::Pending;
        self.reset.cancel();
    }
}
