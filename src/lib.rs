//! # shelltap
//!
//! Automation core for line-oriented device shells (Zephyr-style `uart:~$`
//! consoles and anything that answers `help` with `name : description`
//! lines) reached over a raw character stream.
//!
//! The device shell speaks no protocol: it prints human-oriented text with
//! ANSI decoration, in chunks of arbitrary size. shelltap turns that stream
//! into structured data and actions:
//!
//! - [`completion`] decides when a response has finished.
//! - [`prompt`] infers the idle prompt string.
//! - [`matchers`] count literals, track OK/FAIL signals and slice fields out
//!   of the stream, exactly once across chunk boundaries.
//! - [`trigger`] answers a pattern with a command.
//! - [`discovery`] probes `help` and `<cmd> --help` to build a command tree.
//! - [`scheduler`] injects periodic commands without eating the operator's
//!   half-typed input.
//! - [`runner`] runs a script and checks each command's return code.
//!
//! ## Quick start
//!
//! ```no_run
//! use shelltap::{DiscoveryEngine, Session, Target, Watchers};
//! use shelltap::config::DiscoveryConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let link = "tcp://192.168.1.20:4000".parse::<Target>()?.open().await?;
//!     let session = Session::new("board", link.transport, Watchers::shared());
//!     session.spawn_pump(link.chunks);
//!
//!     let engine = DiscoveryEngine::new(DiscoveryConfig::default());
//!     let report = engine.scan(&session).await?;
//!     println!("{} commands", report.discovered);
//!     Ok(())
//! }
//! ```
//!
//! ## Watch files
//!
//! The CLI loads matchers, triggers and repeat commands from a watch file:
//!
//! | Directive | Description |
//! |-----------|-------------|
//! | `count "ERR"` | Count occurrences of a literal |
//! | `signal "OK" "FAIL" 5s` | Track the latest of two outcomes, reset after a delay |
//! | `slice "ID:" "\n"` | Extract the text between two markers |
//! | `trigger "login:" "root"` | Send a command whenever a pattern appears |
//! | `repeat "net stats" 2s` | Send a command on a fixed interval |
//! | `# comment` | Full-line or inline comment |

pub mod ansi;
pub mod completion;
pub mod config;
pub mod directive;
pub mod directives;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod matchers;
pub mod parser;
pub mod prompt;
pub(crate) mod pty;
pub(crate) mod pty_reader;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tcp;
pub mod timer;
pub mod transport;
pub mod trigger;
pub mod workbench;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use completion::{Completion, SpeedProfile};
pub use config::Config;
pub use directive::Directive;
pub use discovery::{DiscoveryEngine, ScanEvent, ScanReport};
pub use error::{Result, ShellError};
pub use matchers::{Counter, CounterBank, CounterKind, Scope};
pub use parser::{parse_script_file, parse_script_str, parse_watch_file, parse_watch_str};
pub use prompt::{PromptDetection, PromptDetector};
pub use runner::{Script, ScriptReport, ScriptRunner};
pub use scheduler::{RepeatDefinition, Scheduler};
pub use session::{Session, SessionId};
pub use store::{FileStore, MemoryStore, Store};
pub use transport::{ChannelTransport, Link, Target, Transport};
pub use trigger::{Sequence, TriggerEngine};
pub use workbench::{Watchers, Workbench};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Short random id with a kind prefix, e.g. `cnt_3f9a01bc`.
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}_{:08x}", rand::random::<u32>())
}
