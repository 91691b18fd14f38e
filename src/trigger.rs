//! Trigger-action sequences: when a pattern shows up, answer with a command.
//!
//! Matching uses the same overlap buffer as the counters, with one
//! difference: after a match the buffer is emptied instead of trimmed. A
//! second occurrence that overlaps the residue of the first can therefore be
//! missed, and a single update fires each sequence at most once. This keeps a
//! chatty device from turning one trigger into a command storm.

use crate::error::{Result, ShellError};
use crate::matchers::tail;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub trigger: String,
    pub command: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(skip)]
    buffers: HashMap<SessionId, String>,
}

fn enabled_default() -> bool {
    true
}

impl Sequence {
    pub fn new(trigger: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: crate::new_id("seq"),
            trigger: trigger.into(),
            command: command.into(),
            enabled: true,
            buffers: HashMap::new(),
        }
    }

    /// A disabled sequence, or one missing its trigger or command, never fires.
    pub fn is_armed(&self) -> bool {
        self.enabled && !self.trigger.is_empty() && !self.command.is_empty()
    }

    fn process(&mut self, session: &SessionId, chunk: &str) -> bool {
        if !self.is_armed() {
            return false;
        }
        let buffer = self.buffers.entry(session.clone()).or_default();
        let combined = format!("{buffer}{chunk}");
        if combined.contains(self.trigger.as_str()) {
            buffer.clear();
            return true;
        }
        *buffer = tail(&combined, self.trigger.chars().count() - 1);
        false
    }
}

/// Ordered set of sequences shared by all sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerEngine {
    sequences: Vec<Sequence>,
}

impl TriggerEngine {
    pub fn add(&mut self, trigger: impl Into<String>, command: impl Into<String>) -> String {
        let sequence = Sequence::new(trigger, command);
        let id = sequence.id.clone();
        self.sequences.push(sequence);
        id
    }

    pub fn remove(&mut self, id: &str) -> Result<Sequence> {
        let idx = self.position(id)?;
        Ok(self.sequences.remove(idx))
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let idx = self.position(id)?;
        let sequence = &mut self.sequences[idx];
        sequence.enabled = enabled;
        if !enabled {
            sequence.buffers.clear();
        }
        Ok(())
    }

    /// Move a sequence to `index` (clamped to the end).
    pub fn move_to(&mut self, id: &str, index: usize) -> Result<()> {
        let idx = self.position(id)?;
        let sequence = self.sequences.remove(idx);
        let index = index.min(self.sequences.len());
        self.sequences.insert(index, sequence);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.iter()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Feed a chunk and collect the commands to send back to `session`,
    /// in sequence order.
    pub fn process(&mut self, session: &SessionId, chunk: &str) -> Vec<String> {
        self.sequences
            .iter_mut()
            .filter_map(|sequence| {
                sequence.process(session, chunk).then(|| {
                    info!(
                        %session,
                        trigger = %sequence.trigger,
                        command = %sequence.command,
                        "trigger matched"
                    );
                    sequence.command.clone()
                })
            })
            .collect()
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.sequences
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ShellError::not_found("sequence", id))
    }
}
