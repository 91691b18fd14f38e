//! The [`Transport`] trait and the [`Link`] it comes bundled in.
//!
//! A transport is the write half of the device stream. The read half is an
//! unbounded channel of decoded text chunks, delivered in arrival order with
//! whatever boundaries the underlying reads produced.

use crate::pty::PtyTransport;
use crate::tcp::TcpTransport;
use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Write side of a device stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send text to the device as-is. No terminator is appended.
    async fn send(&self, text: &str) -> io::Result<()>;

    /// Whether the link is still open.
    fn is_connected(&self) -> bool;
}

/// An open transport together with the receiver of its incoming chunks.
pub struct Link {
    pub transport: Arc<dyn Transport>,
    pub chunks: UnboundedReceiver<String>,
}

/// In-memory transport: everything sent comes out of the paired receiver.
///
/// Useful for putting the core behind another I/O layer (a websocket relay,
/// a recorded session) and for tests.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, text: &str) -> io::Result<()> {
        self.tx
            .send(text.to_owned())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel transport closed"))
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Where to find the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Raw socket, `host:port`.
    Tcp(String),
    /// A local link program run inside a PTY (`picocom`, `telnet`, `socat` ...).
    Spawn { program: String, args: Vec<String> },
}

impl Target {
    /// Open the link described by this target.
    pub async fn open(&self) -> Result<Link> {
        match self {
            Target::Tcp(addr) => TcpTransport::connect(addr)
                .await
                .with_context(|| format!("Failed to connect to {addr}")),
            Target::Spawn { program, args } => PtyTransport::spawn(program, args),
        }
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    /// `tcp://host:port` for a socket, anything else is a command line to spawn.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() || !addr.contains(':') {
                return Err(anyhow!("Expected tcp://host:port, got: {}", s));
            }
            return Ok(Target::Tcp(addr.to_string()));
        }
        let mut words = s.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| anyhow!("Empty link command"))?;
        Ok(Target::Spawn {
            program,
            args: words.collect(),
        })
    }
}
