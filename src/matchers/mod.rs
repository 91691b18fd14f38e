//! Streaming pattern matchers.
//!
//! Every matcher keeps a small per-session tail of the text it has already
//! seen. Each chunk is searched as `tail + chunk`, then the tail is cut back
//! to just short of a full match, so a pattern split across two chunks is
//! seen exactly once.

mod literal;
mod signal;
mod slicer;

pub use literal::LiteralCounter;
pub use signal::{SignalCounter, SignalState};
pub use slicer::FieldSlicer;

use crate::error::{Result, ShellError};
use crate::session::SessionId;
use crate::timer::Pulse;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The last `n` characters of `text` as an owned string.
pub(crate) fn tail(text: &str, n: usize) -> String {
    crate::completion::tail_chars(text, n).to_string()
}

/// Which sessions a counter listens to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    All,
    Session(SessionId),
}

impl Scope {
    pub fn includes(&self, session: &SessionId) -> bool {
        match self {
            Scope::All => true,
            Scope::Session(id) => id == session,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterKind {
    Literal(LiteralCounter),
    Signal(SignalCounter),
    Slicer(FieldSlicer),
}

impl CounterKind {
    fn update(&mut self, tail: &mut String, chunk: &str) -> bool {
        match self {
            CounterKind::Literal(c) => c.update(tail, chunk),
            CounterKind::Signal(c) => c.update(tail, chunk),
            CounterKind::Slicer(c) => c.update(tail, chunk),
        }
    }

    fn reset(&mut self) {
        match self {
            CounterKind::Literal(c) => c.count = 0,
            CounterKind::Signal(c) => c.reset(),
            CounterKind::Slicer(c) => c.reset(),
        }
    }
}

/// A matcher with its identity, scope and per-session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    pub kind: CounterKind,
    #[serde(skip)]
    buffers: HashMap<SessionId, String>,
    #[serde(skip)]
    pulse: Pulse,
}

impl Counter {
    pub fn new(kind: CounterKind, scope: Scope) -> Self {
        Self {
            id: crate::new_id("cnt"),
            scope,
            kind,
            buffers: HashMap::new(),
            pulse: Pulse::default(),
        }
    }

    /// Feed one chunk from `session`. Returns true if the counter changed.
    pub fn update(&mut self, session: &SessionId, chunk: &str) -> bool {
        if !self.scope.includes(session) {
            return false;
        }
        let tail = self.buffers.entry(session.clone()).or_default();
        let changed = self.kind.update(tail, chunk);
        if changed {
            self.pulse.trigger();
        }
        changed
    }

    /// True for one second after a change. Bursts do not extend it.
    pub fn is_pulsing(&self) -> bool {
        self.pulse.is_active()
    }

    pub fn reset(&mut self) {
        self.kind.reset();
        self.buffers.clear();
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CounterKind::Literal(c) => write!(f, "count {:?}: {}", c.pattern, c.count),
            CounterKind::Signal(c) => write!(
                f,
                "signal {:?}/{:?}: {}",
                c.positive_pattern,
                c.negative_pattern,
                c.state()
            ),
            CounterKind::Slicer(c) => match &c.extracted_value {
                Some(value) => write!(f, "slice {:?}: {value}", c.start_marker),
                None => write!(f, "slice {:?}: -", c.start_marker),
            },
        }
    }
}

/// All counters of a workbench, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterBank {
    counters: Vec<Counter>,
}

impl CounterBank {
    pub fn add(&mut self, kind: CounterKind, scope: Scope) -> String {
        let counter = Counter::new(kind, scope);
        let id = counter.id.clone();
        tracing::debug!(%id, "counter added");
        self.counters.push(counter);
        id
    }

    pub fn remove(&mut self, id: &str) -> Result<Counter> {
        let idx = self.position(id)?;
        Ok(self.counters.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&Counter> {
        self.counters.iter().find(|c| c.id == id)
    }

    /// Zero one counter: count to 0, signal to pending, slice value cleared.
    pub fn reset_count(&mut self, id: &str) -> Result<()> {
        let idx = self.position(id)?;
        self.counters[idx].reset();
        Ok(())
    }

    pub fn reset_all(&mut self) {
        self.counters.iter_mut().for_each(Counter::reset);
    }

    /// Feed a chunk to every counter scoped to `session`.
    pub fn update(&mut self, session: &SessionId, chunk: &str) -> usize {
        self.counters
            .iter_mut()
            .map(|c| c.update(session, chunk))
            .filter(|changed| *changed)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Counter> {
        self.counters.iter()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.counters
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ShellError::not_found("counter", id))
    }
}
