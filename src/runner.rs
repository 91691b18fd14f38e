//! Scripted command runs with return-code checking.
//!
//! Each command is sent, the runner waits for the prompt to come back, then
//! sends the return-code probe (`retval` by default) and reads the code from
//! output that arrived after the probe was sent. Older output is never
//! consulted, so a stale `retval: 0` cannot mask a failure.

use crate::ansi;
use crate::completion::await_prompt;
use crate::config::{PromptConfig, ScriptConfig};
use crate::error::{Result, ShellError};
use crate::prompt::PromptDetector;
use crate::session::Session;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

static RETVAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)retval[\s:]*(-?\d+)").expect("valid retval regex"));
static RETURN_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)return\s*code[\s:]*(-?\d+)").expect("valid return code regex")
});
static STANDALONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+)$").expect("valid integer regex"));

/// Lines checked for a bare integer when no labelled code is present.
const STANDALONE_LINES: usize = 8;

/// Extract a return code from the reply to the return-code probe.
///
/// Labelled forms (`retval: 1`, `Return code: -22`) win, and the last one in
/// the text is used. Otherwise the newest bare integer line among the last
/// eight lines is used.
pub fn parse_return_code(reply: &str) -> Option<i64> {
    let text = ansi::clean(reply);
    let labelled = RETVAL
        .captures_iter(&text)
        .chain(RETURN_CODE.captures_iter(&text))
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let code = caps[1].parse::<i64>().ok()?;
            Some((start, code))
        })
        .max_by_key(|(start, _)| *start);
    if let Some((_, code)) = labelled {
        return Some(code);
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(STANDALONE_LINES);
    lines[start..]
        .iter()
        .rev()
        .filter_map(|line| STANDALONE.captures(line.trim()))
        .find_map(|caps| caps[1].parse().ok())
}

fn stop_on_error_default() -> bool {
    true
}

/// A named list of device commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub name: String,
    pub commands: Vec<String>,
    #[serde(default = "stop_on_error_default")]
    pub stop_on_error: bool,
}

impl Script {
    pub fn new(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            id: crate::new_id("scr"),
            name: name.into(),
            commands,
            stop_on_error: true,
        }
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }
}

/// What one command returned. `None` when the probe reply had no code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub code: Option<i64>,
}

impl CommandResult {
    pub fn failed(&self) -> bool {
        self.code.is_some_and(|code| code != 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptReport {
    pub results: Vec<CommandResult>,
    /// Commands whose return code could not be read.
    pub unparsed: usize,
    /// True when a failure stopped the run before the last command.
    pub stopped_early: bool,
}

impl ScriptReport {
    pub fn executed(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| r.failed())
    }

    /// Every command returned zero (or nothing readable).
    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Turn the first failure into an error.
    pub fn ensure_success(&self) -> Result<()> {
        match self.failures().next() {
            Some(failure) => Err(ShellError::ScriptCommandFailed {
                command: failure.command.clone(),
                code: failure.code.unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }
}

/// Clears the runner's busy flag on every exit path.
struct RunGuard {
    busy: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(busy: &Arc<AtomicBool>) -> Result<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ShellError::ScriptInProgress)?;
        Ok(Self { busy: busy.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Runs one script at a time.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    config: ScriptConfig,
    detector: PromptDetector,
    busy: Arc<AtomicBool>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(ScriptConfig::default(), &PromptConfig::default())
    }
}

impl ScriptRunner {
    pub fn new(config: ScriptConfig, prompt: &PromptConfig) -> Self {
        Self {
            config,
            detector: PromptDetector::from_config(prompt),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn run(&self, session: &Session, script: &Script) -> Result<ScriptReport> {
        let _guard = RunGuard::acquire(&self.busy)?;
        let commands: Vec<&str> = script
            .commands
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if commands.is_empty() {
            return Err(ShellError::EmptyScript);
        }
        if !session.is_connected() {
            return Err(ShellError::NotConnected);
        }
        if session.prompt().is_none() {
            self.detector.detect_active(session).await?;
        }

        info!(script = %script.name, commands = commands.len(), "script started");
        let mut report = ScriptReport::default();
        for (i, command) in commands.iter().enumerate() {
            let mark = session.output_mark();
            session.send_line(command).await?;
            let outcome = await_prompt(session, mark, self.config.command_timeout()).await;
            if !outcome.is_complete() {
                warn!(%command, ?outcome, "prompt did not return, continuing");
            }

            let probe_mark = session.output_mark();
            session.send_line(&self.config.retval_command).await?;
            let outcome = await_prompt(session, probe_mark, self.config.retval_timeout()).await;
            if !outcome.is_complete() {
                warn!(%command, ?outcome, "no prompt after return-code probe");
            }
            let code = parse_return_code(&session.output_since(probe_mark));

            let result = CommandResult {
                command: command.to_string(),
                code,
            };
            match code {
                None => {
                    warn!(%command, "return code not found in probe reply");
                    report.unparsed += 1;
                }
                Some(0) => info!(%command, "command succeeded"),
                Some(code) => warn!(%command, code, "command failed"),
            }
            let failed = result.failed();
            report.results.push(result);

            if failed && script.stop_on_error {
                report.stopped_early = i + 1 < commands.len();
                warn!(%command, "script stopped on error");
                break;
            }
        }

        if report.succeeded() {
            info!(script = %script.name, "script completed successfully");
        } else {
            warn!(script = %script.name, "script completed with errors");
        }
        Ok(report)
    }
}
