//! Command discovery.
//!
//! A scan walks `Idle → Listing → Selecting → DeepScanning → Pruning → Idle`:
//!
//! - **Listing** sends the list probe (`help`) and merges the root commands.
//! - **Selecting** is the caller's chance to narrow the roots to deep-scan.
//! - **DeepScanning** sends `<full name> --help` for each selected root and,
//!   depth first, for every child found.
//! - **Pruning** removes category nodes that only group their children.
//!
//! Only one scan runs at a time. [`DiscoveryEngine::begin`] fails fast with
//! [`ShellError::ScanInProgress`] while another [`Scan`] is alive; dropping
//! the scan releases the lock on every path.

pub mod grammar;
pub mod registry;

pub use grammar::{HelpEntry, Listing};
pub use registry::{Argument, CommandNode, Registry};

use crate::completion::{CompletionWatch, SpeedProfile};
use crate::config::DiscoveryConfig;
use crate::error::{Result, ShellError};
use crate::session::Session;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PAUSE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Listing,
    Selecting,
    DeepScanning,
    Pruning,
}

/// Progress notifications from a running scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Listed { roots: usize },
    /// Starting the deep scan of root `current` of `total` (1-based).
    Progress {
        current: usize,
        total: usize,
        command: String,
    },
    Discovered { full_name: String },
    /// The soft deadline passed. The scan is paused until
    /// [`ScanControl::resume`] or [`ScanControl::cancel`].
    DeadlineReached { elapsed: Duration },
}

/// Outcome of a deep scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub roots: usize,
    /// Child nodes inserted or refreshed.
    pub discovered: usize,
    pub pruned: Vec<String>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Pause/cancel handle shared with whoever supervises a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ScanControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Continue after a soft deadline.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Stop the scan at the next step. Nodes found so far are kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn wait_while_paused(&self) {
        while self.is_paused() && !self.is_cancelled() {
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }
}

/// Held by a live [`Scan`]. Releases the engine on drop.
#[derive(Debug)]
struct ScanLock {
    busy: Arc<AtomicBool>,
}

impl ScanLock {
    fn acquire(busy: &Arc<AtomicBool>) -> Result<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ShellError::ScanInProgress)?;
        Ok(Self { busy: busy.clone() })
    }
}

impl Drop for ScanLock {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

fn read(registry: &RwLock<Registry>) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(registry: &RwLock<Registry>) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the command registry and the process-wide scan lock.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    registry: Arc<RwLock<Registry>>,
    busy: Arc<AtomicBool>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_registry(config, Arc::new(RwLock::new(Registry::default())))
    }

    pub fn with_registry(config: DiscoveryConfig, registry: Arc<RwLock<Registry>>) -> Self {
        Self {
            config,
            registry,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &Arc<RwLock<Registry>> {
        &self.registry
    }

    /// A copy of the registry as it is right now.
    pub fn snapshot(&self) -> Registry {
        read(&self.registry).clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Take the scan lock and start a scan driven step by step by the caller.
    pub fn begin<'a>(&self, session: &'a Session) -> Result<Scan<'a>> {
        let lock = ScanLock::acquire(&self.busy)?;
        if !session.is_connected() {
            return Err(ShellError::NotConnected);
        }
        let (events, events_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        Ok(Scan {
            session,
            config: self.config.clone(),
            registry: self.registry.clone(),
            _lock: lock,
            control: ScanControl::default(),
            events,
            events_rx: Some(events_rx),
            phase: ScanPhase::Listing,
            started: now,
            soft_deadline: now + self.config.soft_deadline(),
            confirm_deadlines: true,
            in_flight: HashSet::new(),
            discovered: 0,
            roots: 0,
        })
    }

    /// List and deep-scan every root without operator interaction.
    /// Soft deadlines are logged and passed.
    pub async fn scan(&self, session: &Session) -> Result<ScanReport> {
        let mut scan = self.begin(session)?.confirm_deadlines(false);
        scan.list().await?;
        Ok(scan.deep_scan(None).await)
    }

    /// Probe one node and upsert its direct children, without recursing.
    pub async fn discover_one(&self, session: &Session, full_name: &str) -> Result<Vec<CommandNode>> {
        let scan = self.begin(session)?;
        let node = read(&self.registry)
            .get(full_name)
            .cloned()
            .ok_or_else(|| ShellError::not_found("command", full_name))?;
        let text = scan.probe(&node).await;
        let entries = grammar::parse_subcommands(&text, &node.full_name);
        let mut registry = write(&self.registry);
        let children: Vec<CommandNode> = entries
            .into_iter()
            .filter_map(|entry| registry.upsert_child(&node.full_name, entry))
            .collect();
        info!(command = %full_name, children = children.len(), "subcommands synced");
        Ok(children)
    }
}

/// A scan in progress. Holds the scan lock until dropped.
pub struct Scan<'a> {
    session: &'a Session,
    config: DiscoveryConfig,
    registry: Arc<RwLock<Registry>>,
    _lock: ScanLock,
    control: ScanControl,
    events: UnboundedSender<ScanEvent>,
    events_rx: Option<UnboundedReceiver<ScanEvent>>,
    phase: ScanPhase,
    started: Instant,
    soft_deadline: Instant,
    confirm_deadlines: bool,
    in_flight: HashSet<String>,
    discovered: usize,
    roots: usize,
}

impl<'a> Scan<'a> {
    /// Pause at soft deadlines until resumed (the default), or just log and
    /// carry on.
    pub fn confirm_deadlines(mut self, confirm: bool) -> Self {
        self.confirm_deadlines = confirm;
        self
    }

    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    /// The event receiver. Available once.
    pub fn events(&mut self) -> Option<UnboundedReceiver<ScanEvent>> {
        self.events_rx.take()
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    fn speed(&self) -> SpeedProfile {
        self.config.speed
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }

    /// Send the list probe and merge the root commands it reports.
    pub async fn list(&mut self) -> Result<Vec<CommandNode>> {
        self.phase = ScanPhase::Listing;
        let capture = self.session.begin_capture();
        let sent = self.session.send_line(&self.config.list_command).await;
        if let Err(e) = sent {
            self.session.end_capture();
            return Err(e);
        }
        let prompt = self.session.prompt();
        let outcome = CompletionWatch::new(&capture, self.config.list_timeout())
            .speed(self.speed())
            .gate(&self.config.list_marker)
            .prompt(prompt.as_deref())
            .cancel(self.control.token())
            .wait()
            .await;
        self.session.end_capture();
        debug!(?outcome, bytes = capture.len(), "listing finished");

        if self.control.is_cancelled() {
            return Err(ShellError::DiscoveryCancelled);
        }
        let text = capture.text();
        if text.is_empty() {
            return Err(ShellError::DiscoveryTimeout(self.config.list_timeout()));
        }
        let listing = grammar::parse_listing(&text, &self.config.list_marker);
        if !listing.marker_found {
            return Err(ShellError::UnexpectedFormat {
                marker: self.config.list_marker.clone(),
            });
        }
        if listing.entries.is_empty() {
            return Err(ShellError::DiscoveryPartial);
        }

        let names: Vec<String> = listing.entries.iter().map(|e| e.name.clone()).collect();
        let roots: Vec<CommandNode> = {
            let mut registry = write(&self.registry);
            let added = registry.merge_roots(listing.entries);
            debug!(added, "roots merged");
            names
                .iter()
                .filter_map(|name| registry.get(name).cloned())
                .collect()
        };
        info!(roots = roots.len(), "command listing parsed");
        self.emit(ScanEvent::Listed { roots: roots.len() });
        self.phase = ScanPhase::Selecting;
        Ok(roots)
    }

    /// Deep-scan the selected roots (all discovered roots when `None`),
    /// then prune categories. Runs to completion even when cancelled, in
    /// which case the report says so and what was found is kept.
    pub async fn deep_scan(mut self, selection: Option<&[String]>) -> ScanReport {
        self.phase = ScanPhase::DeepScanning;
        let roots = read(&self.registry).scan_roots(selection);
        self.roots = roots.len();
        let total = roots.len();
        for (i, root) in roots.into_iter().enumerate() {
            if self.control.is_cancelled() {
                break;
            }
            self.emit(ScanEvent::Progress {
                current: i + 1,
                total,
                command: root.full_name.clone(),
            });
            self.discover_deep(root).await;
        }

        self.phase = ScanPhase::Pruning;
        let pruned = write(&self.registry).prune_categories();
        let cancelled = self.control.is_cancelled();
        let report = ScanReport {
            roots: self.roots,
            discovered: self.discovered,
            pruned,
            cancelled,
            elapsed: self.started.elapsed(),
        };
        if cancelled {
            info!(discovered = report.discovered, "command discovery cancelled");
        } else {
            info!(
                discovered = report.discovered,
                pruned = report.pruned.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "command discovery complete"
            );
        }
        report
    }

    async fn discover_deep(&mut self, node: CommandNode) {
        if self.control.is_cancelled() || self.in_flight.contains(&node.full_name) {
            return;
        }
        if !self.checkpoint().await {
            return;
        }

        self.in_flight.insert(node.full_name.clone());
        let text = self.probe(&node).await;
        let entries = grammar::parse_subcommands(&text, &node.full_name);
        if !entries.is_empty() {
            let children: Vec<CommandNode> = {
                let mut registry = write(&self.registry);
                if grammar::has_category_header(&text, &node.name) {
                    debug!(command = %node.full_name, "category");
                    registry.mark_category(&node.full_name);
                }
                entries
                    .into_iter()
                    .filter_map(|entry| registry.upsert_child(&node.full_name, entry))
                    .collect()
            };
            for child in &children {
                self.discovered += 1;
                self.emit(ScanEvent::Discovered {
                    full_name: child.full_name.clone(),
                });
            }
            for child in children {
                if self.control.is_cancelled() {
                    break;
                }
                Box::pin(self.discover_deep(child)).await;
            }
        }
        self.in_flight.remove(&node.full_name);
    }

    /// Handle the soft deadline. Returns false if the scan was cancelled.
    async fn checkpoint(&mut self) -> bool {
        if Instant::now() < self.soft_deadline {
            return true;
        }
        let elapsed = self.started.elapsed();
        if self.confirm_deadlines {
            // Paused before the event goes out, so a supervisor that sees the
            // event always sees the pause.
            self.control.pause();
            self.emit(ScanEvent::DeadlineReached { elapsed });
            info!(elapsed_secs = elapsed.as_secs(), "discovery paused at soft deadline");
            self.control.wait_while_paused().await;
        } else {
            self.emit(ScanEvent::DeadlineReached { elapsed });
            info!(elapsed_secs = elapsed.as_secs(), "discovery still running");
        }
        if self.control.is_cancelled() {
            return false;
        }
        self.soft_deadline = Instant::now() + self.config.extension();
        true
    }

    /// Send `<full name> --help` and return whatever came back.
    async fn probe(&self, node: &CommandNode) -> String {
        let capture = self.session.begin_capture();
        let probe = format!("{} {}", node.full_name.trim(), self.config.help_flag);
        if let Err(e) = self.session.send_line(&probe).await {
            warn!(command = %node.full_name, error = %e, "help probe not sent");
            self.session.end_capture();
            return String::new();
        }
        let prompt = self.session.prompt();
        let outcome = CompletionWatch::new(&capture, self.speed().probe_timeout())
            .speed(self.speed())
            .prompt(prompt.as_deref())
            .cancel(self.control.token())
            .wait()
            .await;
        self.session.end_capture();
        debug!(command = %node.full_name, ?outcome, bytes = capture.len(), "probe finished");
        tokio::time::sleep(self.speed().inter_probe_delay()).await;
        capture.text()
    }
}

impl Drop for Scan<'_> {
    fn drop(&mut self) {
        self.session.end_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use crate::workbench::Watchers;
    use std::collections::HashMap;

    const REPLIES: &[(&str, &str)] = &[
        (
            "help",
            "Available commands:\n  kernel : Kernel commands\n  net : Networking commands\n",
        ),
        (
            "kernel --help",
            "kernel - Kernel commands\nSubcommands:\n  uptime :Kernel uptime.\n  version :Kernel version.\n",
        ),
        ("kernel uptime --help", "kernel uptime - Kernel uptime.\n"),
        ("kernel version --help", "kernel version - Kernel version.\n"),
        ("net --help", "net - Networking commands\nSubcommands:\n  iface :Interfaces\n"),
        ("net iface --help", "net iface - Interfaces\n"),
    ];

    /// A session whose device echoes each line and answers from `REPLIES`.
    fn shell() -> Arc<Session> {
        let (transport, mut sent) = ChannelTransport::pair();
        let session = Session::new("dev", Arc::new(transport), Watchers::shared());
        let device = session.clone();
        let replies: HashMap<&str, &str> = REPLIES.iter().copied().collect();
        tokio::spawn(async move {
            while let Some(line) = sent.recv().await {
                let command = line.trim();
                let body = replies.get(command).copied().unwrap_or_default();
                device.ingest(&format!("{command}\r\n{body}uart:~$ ")).await;
            }
        });
        session
    }

    fn engine(soft_deadline_secs: u64, extension_secs: u64) -> DiscoveryEngine {
        DiscoveryEngine::new(DiscoveryConfig {
            soft_deadline_secs,
            extension_secs,
            ..DiscoveryConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_pauses_until_resumed() {
        let session = shell();
        let engine = engine(0, 30);
        let mut scan = engine.begin(&session).unwrap();
        let control = scan.control();
        let mut events = scan.events().unwrap();
        scan.list().await.unwrap();

        let supervise = async {
            let mut deadlines = 0;
            while let Some(event) = events.recv().await {
                if let ScanEvent::DeadlineReached { .. } = event {
                    deadlines += 1;
                    assert!(control.is_paused());
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    assert!(control.is_paused());
                    control.resume();
                }
            }
            deadlines
        };
        let (report, deadlines) = tokio::join!(scan.deep_scan(None), supervise);

        assert_eq!(deadlines, 1);
        assert!(!report.cancelled);
        assert!(report.elapsed >= Duration::from_secs(10));
        assert_eq!(report.pruned, ["kernel", "net"]);
        assert!(engine.snapshot().contains("net iface"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extension_sets_next_deadline() {
        let session = shell();
        let engine = engine(0, 0);
        let mut scan = engine.begin(&session).unwrap();
        let control = scan.control();
        let mut events = scan.events().unwrap();
        scan.list().await.unwrap();

        let supervise = async {
            let mut deadlines = 0;
            while let Some(event) = events.recv().await {
                if let ScanEvent::DeadlineReached { .. } = event {
                    deadlines += 1;
                    control.resume();
                }
            }
            deadlines
        };
        let (report, deadlines) = tokio::join!(scan.deep_scan(None), supervise);

        // Once before each of the five probes.
        assert_eq!(deadlines, 5);
        assert_eq!(report.discovered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_paused() {
        let session = shell();
        let engine = engine(0, 0);
        let mut scan = engine.begin(&session).unwrap();
        let control = scan.control();
        let mut events = scan.events().unwrap();
        scan.list().await.unwrap();

        let supervise = async {
            let mut deadlines = 0;
            while let Some(event) = events.recv().await {
                if let ScanEvent::DeadlineReached { .. } = event {
                    deadlines += 1;
                    if deadlines == 1 {
                        control.resume();
                    } else {
                        control.cancel();
                    }
                }
            }
            deadlines
        };
        let (report, deadlines) = tokio::join!(scan.deep_scan(None), supervise);

        assert_eq!(deadlines, 2);
        assert!(report.cancelled);
        assert_eq!(report.pruned, ["kernel"]);
        let registry = engine.snapshot();
        assert!(registry.contains("kernel uptime"));
        assert!(registry.contains("kernel version"));
        assert!(!registry.contains("net iface"));
        assert!(!engine.is_scanning());
        assert!(engine.begin(&session).is_ok());
    }
}
