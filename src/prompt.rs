//! Inferring the shell's idle prompt.

use crate::ansi;
use crate::config::PromptConfig;
use crate::error::Result;
use crate::session::Session;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Specific multi-character prompts first, then the generic markers.
static PROMPT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"uart:~\$\s*$",
        r"zephyr:~\$\s*$",
        r"[\w-]+:~\$\s*$",
        r"\$\s*$",
        r">\s*$",
        r"#\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid prompt regex"))
    .collect()
});

const SCANNED_LINES: usize = 15;
const END_WINDOW: usize = 100;

fn match_prompt(line: &str) -> Option<String> {
    PROMPT_PATTERNS.iter().find_map(|pattern| {
        let prompt = pattern.find(line)?.as_str().trim();
        (!prompt.is_empty()).then(|| prompt.to_string())
    })
}

/// Find the prompt in `text` without sending anything.
///
/// Scans the last 15 non-empty lines newest first, then the raw end of the
/// buffer in case the prompt line is still incomplete.
pub fn detect_passive(text: &str) -> Option<String> {
    let cleaned = ansi::clean(text);
    let lines: Vec<&str> = cleaned.split('\n').collect();
    let start = lines.len().saturating_sub(SCANNED_LINES);
    let found = lines[start..]
        .iter()
        .rev()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .find_map(match_prompt);
    if found.is_some() {
        return found;
    }
    match_prompt(crate::completion::tail_chars(&cleaned, END_WINDOW).trim())
}

/// Result of active detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptDetection {
    Detected(String),
    /// Nothing recognisable came back; the fallback prompt was assigned.
    Fallback(String),
}

impl PromptDetection {
    pub fn prompt(&self) -> &str {
        match self {
            PromptDetection::Detected(p) | PromptDetection::Fallback(p) => p,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PromptDetection::Fallback(_))
    }
}

/// Active prompt detection: nudge the shell with a bare newline and watch
/// what comes back.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    fallback: String,
    attempts: u32,
    base_delay: Duration,
    step_delay: Duration,
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self::from_config(&PromptConfig::default())
    }
}

impl PromptDetector {
    pub fn from_config(config: &PromptConfig) -> Self {
        Self {
            fallback: config.fallback.clone(),
            attempts: config.attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            step_delay: Duration::from_millis(config.step_delay_ms),
        }
    }

    /// Detect the prompt and store it on the session.
    ///
    /// Fails only if the newline cannot be sent. Never waits longer than the
    /// sum of the backoff delays.
    pub async fn detect_active(&self, session: &Session) -> Result<PromptDetection> {
        let mark = session.output_mark();
        session.send("\n").await?;

        for attempt in 0..self.attempts {
            tokio::time::sleep(self.base_delay + self.step_delay * attempt).await;
            if session.output_mark() == mark {
                debug!(attempt, "no reply to prompt probe yet");
                continue;
            }
            if let Some(prompt) = detect_passive(&session.output_tail()) {
                info!(session = %session.id(), %prompt, "prompt detected");
                session.set_prompt(Some(prompt.clone()));
                return Ok(PromptDetection::Detected(prompt));
            }
        }

        if let Some(prompt) = detect_passive(&session.output_tail()) {
            info!(session = %session.id(), %prompt, "prompt detected in buffer");
            session.set_prompt(Some(prompt.clone()));
            return Ok(PromptDetection::Detected(prompt));
        }

        warn!(
            session = %session.id(),
            fallback = %self.fallback,
            "could not detect prompt, using fallback"
        );
        session.set_prompt(Some(self.fallback.clone()));
        Ok(PromptDetection::Fallback(self.fallback.clone()))
    }
}
