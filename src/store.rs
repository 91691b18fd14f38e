//! Key-value persistence for workbench state.
//!
//! Values are JSON documents. [`FileStore`] keeps one `<key>.json` file per
//! key in a directory. [`MemoryStore`] keeps them in a map.

use crate::discovery::{CommandNode, Registry};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const REGISTRY_KEY: &str = "registry";
pub const COUNTERS_KEY: &str = "counters";
pub const SEQUENCES_KEY: &str = "sequences";
pub const REPEATS_KEY: &str = "repeats";
pub const SCRIPTS_KEY: &str = "scripts";

/// Snapshot format written by this version.
pub const SNAPSHOT_VERSION: &str = "2.0";

pub trait Store: Send + Sync {
    /// `Ok(None)` when nothing was saved under `key`.
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Store for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Replaced atomically via a sibling temp file.
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "saved");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(crate::lock(&self.values).get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        crate::lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Persisted form of the command registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub version: String,
    #[serde(default)]
    pub last_scanned: Option<DateTime<Utc>>,
    pub commands: Vec<CommandNode>,
}

impl RegistrySnapshot {
    pub fn capture(registry: &Registry, last_scanned: Option<DateTime<Utc>>) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            last_scanned,
            commands: registry.nodes(),
        }
    }

    pub fn into_registry(self) -> Registry {
        Registry::from_nodes(self.commands)
    }
}

/// Deserialize the value under `key`. A missing value is `None`; an
/// unreadable one is logged and treated as missing.
pub fn load_json<T>(store: &dyn Store, key: &str) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let Some(text) = store.load(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(%key, error = %e, "ignoring unreadable saved state");
            Ok(None)
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    store.save(key, &text)
}

/// Load the registry snapshot, ignoring snapshots of another format version.
pub fn load_registry(store: &dyn Store) -> Result<Option<RegistrySnapshot>> {
    let Some(snapshot) = load_json::<RegistrySnapshot>(store, REGISTRY_KEY)? else {
        return Ok(None);
    };
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(version = %snapshot.version, "ignoring registry snapshot of unknown version");
        return Ok(None);
    }
    Ok(Some(snapshot))
}
