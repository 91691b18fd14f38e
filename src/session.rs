//! A connected device shell.
//!
//! [`Session`] is the hub every chunk flows through. [`Session::ingest`]
//! routes each chunk, in order, to:
//!
//! 1. the output handler (stdout by default in the CLI),
//! 2. the bounded output tail,
//! 3. passive prompt detection while the prompt is unknown,
//! 4. the discovery capture, if one is active,
//! 5. the counters, on text with ANSI escapes removed,
//! 6. the triggers, on the same text (suspended while a discovery capture is
//!    active, so probe replies never fire automation).

use crate::ansi;
use crate::completion::Capture;
use crate::error::{Result, ShellError};
use crate::lock;
use crate::prompt;
use crate::transport::Transport;
use crate::workbench::Watchers;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Bytes of recent output kept per session.
pub const OUTPUT_TAIL_LIMIT: usize = 5000;

pub type OutputHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    prompt: Option<String>,
    output_tail: String,
    /// Total bytes ingested since the session started.
    received: u64,
    /// Keystrokes typed since the last line terminator.
    pending_input: String,
    /// Escape sequence cut off at the end of the previous chunk.
    escape_carry: String,
}

pub struct Session {
    id: SessionId,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    capture: Mutex<Option<Capture>>,
    watchers: Arc<Watchers>,
    output_handler: Mutex<Option<OutputHandler>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connected", &self.transport.is_connected())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        id: impl Into<SessionId>,
        transport: Arc<dyn Transport>,
        watchers: Arc<Watchers>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            transport,
            state: Mutex::new(SessionState::default()),
            capture: Mutex::new(None),
            watchers,
            output_handler: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn watchers(&self) -> &Arc<Watchers> {
        &self.watchers
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Every ingested chunk is passed to `handler` before anything else sees it.
    pub fn set_output_handler<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *lock(&self.output_handler) = Some(Arc::new(handler));
    }

    /// Send text as-is.
    pub async fn send(&self, text: &str) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(ShellError::NotConnected);
        }
        trace!(session = %self.id, text = ?text, "send");
        self.transport.send(text).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                ShellError::NotConnected
            } else {
                ShellError::Io(e)
            }
        })
    }

    /// Send a command followed by a newline.
    pub async fn send_line(&self, command: &str) -> Result<()> {
        self.send(&format!("{command}\n")).await
    }

    /// Send operator keystrokes, keeping track of the unsent line.
    pub async fn type_keys(&self, keys: &str) -> Result<()> {
        {
            let mut state = lock(&self.state);
            for ch in keys.chars() {
                match ch {
                    '\r' | '\n' | '\u{15}' | '\u{3}' => state.pending_input.clear(),
                    '\u{8}' | '\u{7f}' => {
                        state.pending_input.pop();
                    }
                    ' '..='~' => state.pending_input.push(ch),
                    _ => {}
                }
            }
        }
        self.send(keys).await
    }

    pub fn pending_input(&self) -> String {
        lock(&self.state).pending_input.clone()
    }

    pub fn prompt(&self) -> Option<String> {
        lock(&self.state).prompt.clone()
    }

    pub fn set_prompt(&self, prompt: Option<String>) {
        lock(&self.state).prompt = prompt;
    }

    /// Recent output, at most [`OUTPUT_TAIL_LIMIT`] bytes.
    pub fn output_tail(&self) -> String {
        lock(&self.state).output_tail.clone()
    }

    /// Position in the output stream, for use with [`Session::output_since`].
    pub fn output_mark(&self) -> u64 {
        lock(&self.state).received
    }

    /// Output received after `mark`, as far as the tail still holds it.
    pub fn output_since(&self, mark: u64) -> String {
        let state = lock(&self.state);
        let fresh = state.received.saturating_sub(mark);
        let tail = &state.output_tail;
        let Ok(fresh) = usize::try_from(fresh) else {
            return tail.clone();
        };
        if fresh >= tail.len() {
            return tail.clone();
        }
        let mut start = tail.len() - fresh;
        while !tail.is_char_boundary(start) {
            start += 1;
        }
        tail[start..].to_string()
    }

    /// Start collecting every chunk into a fresh capture.
    pub fn begin_capture(&self) -> Capture {
        let capture = Capture::default();
        *lock(&self.capture) = Some(capture.clone());
        capture
    }

    pub fn end_capture(&self) {
        *lock(&self.capture) = None;
    }

    pub fn is_capturing(&self) -> bool {
        lock(&self.capture).is_some()
    }

    /// Route one chunk of device output.
    pub async fn ingest(&self, chunk: &str) {
        let handler = lock(&self.output_handler).clone();
        if let Some(handler) = handler {
            handler(chunk);
        }

        {
            let mut state = lock(&self.state);
            state.received += chunk.len() as u64;
            state.output_tail.push_str(chunk);
            if state.output_tail.len() > OUTPUT_TAIL_LIMIT {
                let mut cut = state.output_tail.len() - OUTPUT_TAIL_LIMIT;
                while !state.output_tail.is_char_boundary(cut) {
                    cut += 1;
                }
                state.output_tail.drain(..cut);
            }
            if state.prompt.is_none() {
                if let Some(found) = prompt::detect_passive(&state.output_tail) {
                    info!(session = %self.id, prompt = %found, "prompt detected");
                    state.prompt = Some(found);
                }
            }
        }

        let visible = {
            let mut state = lock(&self.state);
            let mut text = std::mem::take(&mut state.escape_carry);
            text.push_str(chunk);
            let (complete, partial) = ansi::split_trailing_escape(&text);
            state.escape_carry = partial.to_string();
            ansi::strip_ansi(complete)
        };

        let capturing = {
            let capture = lock(&self.capture);
            if let Some(capture) = capture.as_ref() {
                capture.push(chunk);
            }
            capture.is_some()
        };

        if visible.is_empty() {
            return;
        }
        let commands = self.watchers.observe(&self.id, &visible, !capturing);
        for command in commands {
            if let Err(e) = self.send_line(&command).await {
                warn!(session = %self.id, %command, error = %e, "trigger response not sent");
            }
        }
    }

    /// Feed every chunk from `chunks` into [`Session::ingest`] until the link closes.
    pub fn spawn_pump(self: &Arc<Self>, mut chunks: UnboundedReceiver<String>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                session.ingest(&chunk).await;
            }
            debug!(session = %session.id, "link closed");
        })
    }
}
