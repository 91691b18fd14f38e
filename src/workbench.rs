//! Everything an operator builds up around a device: counters, triggers,
//! the command registry, repeat commands and saved scripts.

use crate::config::Config;
use crate::discovery::{DiscoveryEngine, Registry};
use crate::error::Result;
use crate::lock;
use crate::matchers::CounterBank;
use crate::runner::Script;
use crate::scheduler::{RepeatDefinition, Scheduler};
use crate::session::SessionId;
use crate::store::{self, RegistrySnapshot, Store};
use crate::trigger::TriggerEngine;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

/// Counters and triggers shared by every session.
#[derive(Debug, Default)]
pub struct Watchers {
    counters: Mutex<CounterBank>,
    triggers: Mutex<TriggerEngine>,
}

impl Watchers {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn new(counters: CounterBank, triggers: TriggerEngine) -> Self {
        Self {
            counters: Mutex::new(counters),
            triggers: Mutex::new(triggers),
        }
    }

    pub fn counters(&self) -> MutexGuard<'_, CounterBank> {
        lock(&self.counters)
    }

    pub fn triggers(&self) -> MutexGuard<'_, TriggerEngine> {
        lock(&self.triggers)
    }

    /// Feed one chunk to every counter and, when enabled, every trigger.
    /// Returns the commands the triggers want sent.
    pub fn observe(&self, session: &SessionId, chunk: &str, triggers_enabled: bool) -> Vec<String> {
        let changed = self.counters().update(session, chunk);
        if changed > 0 {
            debug!(%session, changed, "counters updated");
        }
        if !triggers_enabled {
            return Vec::new();
        }
        self.triggers().process(session, chunk)
    }
}

pub struct Workbench {
    pub watchers: Arc<Watchers>,
    pub registry: Arc<RwLock<Registry>>,
    pub scheduler: Scheduler,
    pub scripts: Vec<Script>,
    last_scanned: Option<DateTime<Utc>>,
}

impl Workbench {
    pub fn new(config: &Config) -> Self {
        Self {
            watchers: Watchers::shared(),
            registry: Arc::new(RwLock::new(Registry::default())),
            scheduler: Scheduler::new(config.repeat.clone()),
            scripts: Vec::new(),
            last_scanned: None,
        }
    }

    /// Restore saved state. Anything missing or unreadable starts empty.
    pub fn load(store: &dyn Store, config: &Config) -> Result<Self> {
        let counters: CounterBank = store::load_json(store, store::COUNTERS_KEY)?.unwrap_or_default();
        let triggers: TriggerEngine = store::load_json(store, store::SEQUENCES_KEY)?.unwrap_or_default();
        let repeats: Vec<RepeatDefinition> =
            store::load_json(store, store::REPEATS_KEY)?.unwrap_or_default();
        let scripts: Vec<Script> = store::load_json(store, store::SCRIPTS_KEY)?.unwrap_or_default();
        let (registry, last_scanned) = match store::load_registry(store)? {
            Some(snapshot) => {
                let last_scanned = snapshot.last_scanned;
                (snapshot.into_registry(), last_scanned)
            }
            None => (Registry::default(), None),
        };

        info!(
            counters = counters.len(),
            sequences = triggers.len(),
            repeats = repeats.len(),
            scripts = scripts.len(),
            commands = registry.len(),
            "workbench loaded"
        );
        Ok(Self {
            watchers: Arc::new(Watchers::new(counters, triggers)),
            registry: Arc::new(RwLock::new(registry)),
            scheduler: Scheduler::with_definitions(config.repeat.clone(), repeats),
            scripts,
            last_scanned,
        })
    }

    pub fn save(&self, store: &dyn Store) -> Result<()> {
        store::save_json(store, store::COUNTERS_KEY, &*self.watchers.counters())?;
        store::save_json(store, store::SEQUENCES_KEY, &*self.watchers.triggers())?;
        store::save_json(store, store::REPEATS_KEY, &self.scheduler.definitions())?;
        store::save_json(store, store::SCRIPTS_KEY, &self.scripts)?;
        let snapshot = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            RegistrySnapshot::capture(&registry, self.last_scanned)
        };
        store::save_json(store, store::REGISTRY_KEY, &snapshot)?;
        debug!("workbench saved");
        Ok(())
    }

    /// A discovery engine that scans into this workbench's registry.
    pub fn discovery(&self, config: &Config) -> DiscoveryEngine {
        DiscoveryEngine::with_registry(config.discovery.clone(), self.registry.clone())
    }

    pub fn last_scanned(&self) -> Option<DateTime<Utc>> {
        self.last_scanned
    }

    pub fn mark_scanned(&mut self) {
        self.last_scanned = Some(Utc::now());
    }

    pub fn script(&self, name: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.name == name || s.id == name)
    }
}
