//! The [`ShellError`] type shared by every core operation.
//!
//! All of these are recoverable: they come back to the caller as values and
//! never tear down the session. A leaf command whose help reply lists no
//! subcommands is not an error at all, it simply yields an empty list.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the core.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The transport is closed or was never opened.
    #[error("not connected to a device")]
    NotConnected,

    /// Another command discovery holds the scan lock.
    #[error("command discovery already in progress")]
    ScanInProgress,

    /// The listing probe produced no output at all.
    #[error("no response from device within {0:?}")]
    DiscoveryTimeout(Duration),

    /// Output arrived but the listing marker never appeared in it.
    #[error("unexpected listing format: marker {marker:?} not found")]
    UnexpectedFormat { marker: String },

    /// The listing marker was found but no command lines followed it.
    #[error("device replied but no commands could be parsed")]
    DiscoveryPartial,

    /// The operator cancelled a discovery before it produced a listing.
    #[error("command discovery cancelled")]
    DiscoveryCancelled,

    /// Another script is already running.
    #[error("another script is already running")]
    ScriptInProgress,

    /// A script with no non-empty command lines.
    #[error("script has no commands")]
    EmptyScript,

    /// A script command reported a non-zero return code.
    #[error("command {command:?} returned {code}")]
    ScriptCommandFailed { command: String, code: i64 },

    /// Repeat intervals must be positive.
    #[error("invalid repeat interval {0:?}")]
    InvalidInterval(Duration),

    /// Lookup of a counter, sequence, repeat command or registry node failed.
    #[error("unknown {kind} {id:?}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("persisted state could not be encoded or decoded: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ShellError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Result alias used throughout the library.
pub type Result<T, E = ShellError> = std::result::Result<T, E>;
