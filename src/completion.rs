//! Deciding when a shell response has finished.
//!
//! Device shells never say "done". A response is considered complete on the
//! first of:
//!
//! 1. the ANSI-stripped text ends with an idle prompt,
//! 2. the amount of text stopped growing for a number of polls that depends
//!    on the [`SpeedProfile`],
//! 3. the timeout.
//!
//! Waiting is a poll loop on [`POLL_INTERVAL`] that yields to the runtime
//! between polls and can be cut short with a [`CancellationToken`].

use crate::ansi;
use crate::lock;
use crate::session::Session;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How many trailing characters are checked for an idle prompt.
const PROMPT_WINDOW: usize = 50;

static IDLE_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[$>#]\s*$").expect("valid idle prompt regex"));

/// Pacing for discovery probes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SpeedProfile {
    Fast,
    #[default]
    Normal,
    Slow,
}

impl SpeedProfile {
    /// Unchanged polls that count as a finished response.
    pub fn stability_polls(self) -> u32 {
        match self {
            SpeedProfile::Fast => 2,
            SpeedProfile::Normal => 3,
            SpeedProfile::Slow => 4,
        }
    }

    /// Timeout for a single `--help` probe.
    pub fn probe_timeout(self) -> Duration {
        match self {
            SpeedProfile::Fast => Duration::from_millis(600),
            SpeedProfile::Normal => Duration::from_millis(1000),
            SpeedProfile::Slow => Duration::from_millis(2000),
        }
    }

    /// Pause between consecutive probes.
    pub fn inter_probe_delay(self) -> Duration {
        match self {
            SpeedProfile::Fast => Duration::from_millis(5),
            SpeedProfile::Normal => Duration::from_millis(10),
            SpeedProfile::Slow => Duration::from_millis(50),
        }
    }
}

/// Shared accumulator a session appends to while a capture is active.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    data: Arc<Mutex<String>>,
}

impl Capture {
    pub fn push(&self, chunk: &str) {
        lock(&self.data).push_str(chunk);
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn text(&self) -> String {
        lock(&self.data).clone()
    }

    pub fn clear(&self) {
        lock(&self.data).clear();
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The text ends with an idle prompt.
    Prompt,
    /// The text stopped growing.
    Stable,
    /// Neither happened in time. `received` is the byte count collected.
    TimedOut { received: usize },
    Cancelled,
}

impl Completion {
    pub fn is_complete(self) -> bool {
        matches!(self, Completion::Prompt | Completion::Stable)
    }
}

/// True if the last [`PROMPT_WINDOW`] characters of `text`, ANSI-stripped,
/// end with an idle prompt or contain `known_prompt`.
pub fn ends_with_prompt(text: &str, known_prompt: Option<&str>) -> bool {
    let cleaned = ansi::clean(tail_chars(text, PROMPT_WINDOW * 4));
    let window = tail_chars(&cleaned, PROMPT_WINDOW);
    if let Some(prompt) = known_prompt.filter(|p| !p.is_empty()) {
        if window.trim_end().ends_with(prompt.trim_end()) {
            return true;
        }
    }
    window.trim().len() > 5 && IDLE_PROMPT.is_match(window)
}

/// The last `n` characters of `text`.
pub(crate) fn tail_chars(text: &str, n: usize) -> &str {
    match text.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &text[idx..],
        _ if n == 0 => "",
        _ => text,
    }
}

/// A configured wait on a [`Capture`].
#[derive(Debug)]
pub struct CompletionWatch<'a> {
    source: &'a Capture,
    timeout: Duration,
    stability_polls: u32,
    gate: Option<&'a str>,
    prompt: Option<&'a str>,
    cancel: Option<CancellationToken>,
}

impl<'a> CompletionWatch<'a> {
    pub fn new(source: &'a Capture, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            stability_polls: SpeedProfile::Normal.stability_polls(),
            gate: None,
            prompt: None,
            cancel: None,
        }
    }

    pub fn speed(mut self, speed: SpeedProfile) -> Self {
        self.stability_polls = speed.stability_polls();
        self
    }

    /// Do not consider the response finished until `marker` has appeared.
    pub fn gate(mut self, marker: &'a str) -> Self {
        self.gate = Some(marker);
        self
    }

    /// The session's known prompt, accepted in addition to the generic one.
    pub fn prompt(mut self, prompt: Option<&'a str>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn wait(self) -> Completion {
        let deadline = Instant::now() + self.timeout;
        let mut last_len = 0;
        let mut unchanged = 0;
        loop {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Completion::Cancelled;
            }

            let text = self.source.text();
            let len = text.len();
            let open = self.gate.is_none_or(|marker| text.contains(marker));
            if open {
                if ends_with_prompt(&text, self.prompt) {
                    return Completion::Prompt;
                }
                if len > 0 && len == last_len {
                    unchanged += 1;
                    if unchanged >= self.stability_polls {
                        return Completion::Stable;
                    }
                } else {
                    unchanged = 0;
                }
            }
            last_len = len;

            if Instant::now() >= deadline {
                return Completion::TimedOut { received: len };
            }
            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        _ = token.cancelled() => return Completion::Cancelled,
                    }
                }
                None => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }
}

/// Wait for a prompt to reappear in output received after `since`
/// (a [`Session::output_mark`]).
pub async fn await_prompt(session: &Session, since: u64, timeout: Duration) -> Completion {
    let deadline = Instant::now() + timeout;
    loop {
        let fresh = session.output_since(since);
        let prompt = session.prompt();
        if ends_with_prompt(&fresh, prompt.as_deref()) {
            return Completion::Prompt;
        }
        if Instant::now() >= deadline {
            return Completion::TimedOut {
                received: fresh.len(),
            };
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
