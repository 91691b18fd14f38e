//! Configuration loaded from `config.toml`.
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration for Zephyr-style shells. Durations are stored as integer
//! milliseconds or seconds and exposed as [`Duration`] through accessors.

use crate::completion::SpeedProfile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub prompt: PromptConfig,
    pub script: ScriptConfig,
    pub repeat: RepeatConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load the configuration at `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `<config dir>/shelltap/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shelltap").join("config.toml"))
    }
}

/// Command discovery probes and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Command that lists the root commands.
    pub list_command: String,
    /// Line that introduces the root listing.
    pub list_marker: String,
    /// Appended to a command's full name to ask for its help.
    pub help_flag: String,
    pub speed: SpeedProfile,
    pub list_timeout_ms: u64,
    /// Seconds before the first operator confirmation.
    pub soft_deadline_secs: u64,
    /// Seconds granted by each confirmation.
    pub extension_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            list_command: "help".into(),
            list_marker: "Available commands:".into(),
            help_flag: "--help".into(),
            speed: SpeedProfile::Normal,
            list_timeout_ms: 3000,
            soft_deadline_secs: 60,
            extension_secs: 30,
        }
    }
}

impl DiscoveryConfig {
    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    pub fn soft_deadline(&self) -> Duration {
        Duration::from_secs(self.soft_deadline_secs)
    }

    pub fn extension(&self) -> Duration {
        Duration::from_secs(self.extension_secs)
    }
}

/// Prompt inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Assigned when active detection gives up.
    pub fallback: String,
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub step_delay_ms: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            fallback: "uart:~$".into(),
            attempts: 5,
            base_delay_ms: 300,
            step_delay_ms: 200,
        }
    }
}

/// Scripted runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Return-code probe sent after every command.
    pub retval_command: String,
    pub command_timeout_secs: u64,
    pub retval_timeout_secs: u64,
    pub stop_on_error: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            retval_command: "retval".into(),
            command_timeout_secs: 10,
            retval_timeout_secs: 5,
            stop_on_error: true,
        }
    }
}

impl ScriptConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retval_timeout(&self) -> Duration {
        Duration::from_secs(self.retval_timeout_secs)
    }
}

/// Periodic injection control sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatConfig {
    /// Sent before an injected command when the operator has unsent input.
    pub line_clear: String,
    pub terminator: String,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            line_clear: "\u{15}".into(),
            terminator: "\r".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for persisted state. Defaults to the platform data dir.
    pub dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("shelltap")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.prompt.fallback, "uart:~$");
        assert_eq!(config.script.command_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml(
            "[discovery]\nspeed = \"slow\"\nlist_marker = \"Commands:\"\n\n[repeat]\nterminator = \"\\n\"\n",
        )
        .unwrap();
        assert_eq!(config.discovery.speed, SpeedProfile::Slow);
        assert_eq!(config.discovery.list_marker, "Commands:");
        assert_eq!(config.discovery.list_command, "help");
        assert_eq!(config.repeat.terminator, "\n");
        assert_eq!(config.repeat.line_clear, "\u{15}");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml("[discovery\n").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
