use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tokio::sync::mpsc::UnboundedSender;

/// Spawns a background thread that reads from a PTY and forwards decoded text.
///
/// `connected` is cleared when the reader hits EOF or an error.
pub fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    tx: UnboundedSender<String>,
    connected: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        let mut decoder = Utf8Chunker::default();
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break, // EOF
                Ok(n) => {
                    let text = decoder.decode(&buffer[..n]);
                    if !text.is_empty() && tx.send(text).is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(_) => break,
            }
        }
        connected.store(false, Ordering::Release);
    });
}

/// Decodes a byte stream into UTF-8 text chunk by chunk.
///
/// A multi-byte character split across two reads is held back until the rest
/// of it arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}
