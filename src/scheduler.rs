//! Periodic command injection.
//!
//! A repeat command runs once as soon as it is started and then on a fixed
//! interval, with one timer per session it runs on. Each injection protects
//! the operator's half-typed line: if there is pending input it is cleared
//! with the line-clear control, the command is sent, and the pending input is
//! typed back.

use crate::config::RepeatConfig;
use crate::error::{Result, ShellError};
use crate::session::{Session, SessionId};
use crate::timer::TimerHandle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatDefinition {
    pub id: String,
    pub name: String,
    pub command: String,
    pub interval_ms: u64,
}

impl RepeatDefinition {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn interval_ms(interval: Duration) -> Result<u64> {
    match u64::try_from(interval.as_millis()) {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(ShellError::InvalidInterval(interval)),
    }
}

/// Send `command` without destroying the operator's unsent input.
pub async fn inject(session: &Session, command: &str, config: &RepeatConfig) -> Result<()> {
    let pending = session.pending_input();
    if !pending.is_empty() {
        session.send(&config.line_clear).await?;
    }
    session.send(&format!("{command}{}", config.terminator)).await?;
    if !pending.is_empty() {
        session.send(&pending).await?;
    }
    Ok(())
}

struct Running {
    session: Arc<Session>,
    timer: TimerHandle,
}

/// Repeat definitions and their per-session timers.
///
/// Dropping the scheduler stops every timer.
#[derive(Default)]
pub struct Scheduler {
    config: RepeatConfig,
    definitions: Vec<RepeatDefinition>,
    running: HashMap<String, HashMap<SessionId, Running>>,
}

impl Scheduler {
    pub fn new(config: RepeatConfig) -> Self {
        Self {
            config,
            definitions: Vec::new(),
            running: HashMap::new(),
        }
    }

    /// Restore saved definitions. None of them are started.
    pub fn with_definitions(config: RepeatConfig, definitions: Vec<RepeatDefinition>) -> Self {
        Self {
            definitions,
            ..Self::new(config)
        }
    }

    pub fn definitions(&self) -> &[RepeatDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &str) -> Option<&RepeatDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn add(
        &mut self,
        name: impl Into<String>,
        command: impl Into<String>,
        interval: Duration,
    ) -> Result<String> {
        let definition = RepeatDefinition {
            id: crate::new_id("rep"),
            name: name.into(),
            command: command.into(),
            interval_ms: interval_ms(interval)?,
        };
        let id = definition.id.clone();
        self.definitions.push(definition);
        Ok(id)
    }

    /// Start `id` on `session`, restarting it if it already runs there.
    pub fn start(&mut self, id: &str, session: &Arc<Session>) -> Result<()> {
        let definition = self
            .get(id)
            .cloned()
            .ok_or_else(|| ShellError::not_found("repeat command", id))?;
        let timer = self.spawn_timer(&definition, session.clone());
        let previous = self.running.entry(definition.id.clone()).or_default().insert(
            session.id().clone(),
            Running {
                session: session.clone(),
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.cancel();
        }
        info!(
            command = %definition.command,
            session = %session.id(),
            interval_ms = definition.interval_ms,
            "repeat started"
        );
        Ok(())
    }

    /// Stop `id` on one session. Returns whether it was running.
    pub fn stop(&mut self, id: &str, session: &SessionId) -> bool {
        let Some(sessions) = self.running.get_mut(id) else {
            return false;
        };
        let stopped = sessions.remove(session);
        if sessions.is_empty() {
            self.running.remove(id);
        }
        match stopped {
            Some(running) => {
                running.timer.cancel();
                debug!(%id, %session, "repeat stopped");
                true
            }
            None => false,
        }
    }

    /// Start if stopped, stop if running. Returns the new running state.
    pub fn toggle(&mut self, id: &str, session: &Arc<Session>) -> Result<bool> {
        if self.is_running(id, session.id()) {
            self.stop(id, session.id());
            Ok(false)
        } else {
            self.start(id, session)?;
            Ok(true)
        }
    }

    pub fn is_running(&self, id: &str, session: &SessionId) -> bool {
        self.running
            .get(id)
            .and_then(|sessions| sessions.get(session))
            .is_some_and(|running| !running.timer.is_finished())
    }

    /// Change a definition. Every session it runs on is restarted with the
    /// new command and interval.
    pub fn update(
        &mut self,
        id: &str,
        command: Option<String>,
        interval: Option<Duration>,
    ) -> Result<()> {
        let interval_ms = interval.map(interval_ms).transpose()?;
        let definition = self
            .definitions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| ShellError::not_found("repeat command", id))?;
        if let Some(command) = command {
            definition.command = command;
        }
        if let Some(ms) = interval_ms {
            definition.interval_ms = ms;
        }
        let definition = definition.clone();

        let sessions: Vec<Arc<Session>> = self
            .running
            .remove(id)
            .map(|sessions| {
                sessions
                    .into_values()
                    .map(|running| {
                        running.timer.cancel();
                        running.session
                    })
                    .collect()
            })
            .unwrap_or_default();
        for session in sessions {
            self.start(&definition.id, &session)?;
        }
        Ok(())
    }

    /// Delete a definition and stop all of its timers.
    pub fn remove(&mut self, id: &str) -> Result<RepeatDefinition> {
        let idx = self
            .definitions
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| ShellError::not_found("repeat command", id))?;
        if let Some(sessions) = self.running.remove(id) {
            sessions.into_values().for_each(|running| running.timer.cancel());
        }
        Ok(self.definitions.remove(idx))
    }

    pub fn stop_all(&mut self) {
        for (_, sessions) in self.running.drain() {
            sessions.into_values().for_each(|running| running.timer.cancel());
        }
    }

    fn spawn_timer(&self, definition: &RepeatDefinition, session: Arc<Session>) -> TimerHandle {
        let command = definition.command.clone();
        let interval = definition.interval();
        let config = self.config.clone();
        TimerHandle::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match inject(&session, &command, &config).await {
                    Ok(()) => {}
                    Err(ShellError::NotConnected) => {
                        info!(session = %session.id(), %command, "link closed, repeat stopped");
                        break;
                    }
                    Err(e) => debug!(session = %session.id(), %command, error = %e, "repeat tick failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use crate::workbench::Watchers;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> (Arc<Session>, UnboundedReceiver<String>) {
        let (transport, sent) = ChannelTransport::pair();
        (Session::new("s", Arc::new(transport), Watchers::shared()), sent)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(text);
        }
        out
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut scheduler = Scheduler::default();
        assert!(matches!(
            scheduler.add("x", "x", Duration::ZERO),
            Err(ShellError::InvalidInterval(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_on_interval() {
        let (session, mut sent) = session();
        let mut scheduler = Scheduler::default();
        let id = scheduler.add("stats", "net stats", Duration::from_secs(2)).unwrap();
        scheduler.start(&id, &session).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(drain(&mut sent), ["net stats\r"]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain(&mut sent), ["net stats\r"]);
        assert!(scheduler.is_running(&id, session.id()));

        assert!(scheduler.stop(&id, session.id()));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut sent).is_empty());
        assert!(!scheduler.is_running(&id, session.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_input_is_preserved() {
        let (session, mut sent) = session();
        session.type_keys("kernel up").await.unwrap();
        drain(&mut sent);

        inject(&session, "net stats", &RepeatConfig::default()).await.unwrap();
        assert_eq!(drain(&mut sent), ["\u{15}", "net stats\r", "kernel up"]);
        assert_eq!(session.pending_input(), "kernel up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_restarts_timers() {
        let (session, mut sent) = session();
        let mut scheduler = Scheduler::default();
        let id = scheduler.add("a", "old", Duration::from_secs(60)).unwrap();
        scheduler.start(&id, &session).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(drain(&mut sent), ["old\r"]);

        scheduler
            .update(&id, Some("new".into()), Some(Duration::from_secs(1)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain(&mut sent), ["new\r", "new\r"]);
        assert!(scheduler.is_running(&id, session.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_leaves_no_timer() {
        let (session, mut sent) = session();
        let mut scheduler = Scheduler::default();
        let id = scheduler.add("a", "ping", Duration::from_secs(1)).unwrap();
        assert!(scheduler.toggle(&id, &session).unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.remove(&id).unwrap();
        drain(&mut sent);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(&mut sent).is_empty());
        assert!(scheduler.definitions().is_empty());
    }
}
