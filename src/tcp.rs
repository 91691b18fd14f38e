//! Raw socket transport for serial-over-socket bridges and network terminals.
//!
//! No telnet option negotiation is performed; bridges that speak telnet
//! should be reached through a spawned `telnet` client instead.

use crate::pty_reader::Utf8Chunker;
use crate::transport::{Link, Transport};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

pub struct TcpTransport {
    writer: Mutex<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
}

impl TcpTransport {
    /// Connect to `addr` (`host:port`) and start the reader task.
    pub async fn connect(addr: &str) -> io::Result<Link> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, chunks) = mpsc::unbounded_channel();
        let flag = connected.clone();
        let peer = addr.to_string();
        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];
            let mut decoder = Utf8Chunker::default();
            loop {
                match reader.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = decoder.decode(&buffer[..n]);
                        if !text.is_empty() && tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(%peer, error = %e, "socket read failed");
                        break;
                    }
                }
            }
            flag.store(false, Ordering::Release);
            debug!(%peer, "socket closed");
        });

        Ok(Link {
            transport: Arc::new(TcpTransport {
                writer: Mutex::new(writer),
                connected,
            }),
            chunks,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, text: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
