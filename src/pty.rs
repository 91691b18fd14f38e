use crate::pty_reader::spawn_reader;
use crate::transport::{Link, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// A link program (`picocom`, `telnet`, `socat` ...) running inside a PTY.
struct PtySession {
    // Dropping the master closes the PTY, so it lives as long as the session.
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
}

/// Transport that writes to a link program's stdin through its PTY.
pub struct PtyTransport {
    session: Mutex<PtySession>,
    connected: Arc<AtomicBool>,
}

impl PtyTransport {
    /// Spawn `program` in a PTY and start forwarding its output.
    pub fn spawn(program: &str, args: &[String]) -> Result<Link> {
        let pty_system = portable_pty::native_pty_system();

        // Wide enough that device help lines are not wrapped by the PTY.
        let pty_size = PtySize {
            rows: 48,
            cols: 200,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(pty_size)
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(program);
        for arg in args {
            cmd.arg(arg);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn link program: {program}"))?;

        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, chunks) = mpsc::unbounded_channel();
        spawn_reader(reader, tx, connected.clone());

        let transport = PtyTransport {
            session: Mutex::new(PtySession {
                master: pair.master,
                child,
                writer,
            }),
            connected,
        };

        Ok(Link {
            transport: Arc::new(transport),
            chunks,
        })
    }
}

#[async_trait]
impl Transport for PtyTransport {
    async fn send(&self, text: &str) -> io::Result<()> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.writer.write_all(text.as_bytes())?;
        session.writer.flush()
    }

    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.child.try_wait().ok().flatten().is_none()
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        let _ = session.child.kill();
    }
}
