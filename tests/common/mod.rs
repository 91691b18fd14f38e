//! An in-memory device shell for driving the library end to end.

#![allow(dead_code)]

use shelltap::{ChannelTransport, Session, Watchers};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};

pub const PROMPT: &str = "\x1b[1;32muart:~$ \x1b[m";

/// Replies are cut into chunks of this many characters.
const CHUNK_CHARS: usize = 16;

pub struct FakeDevice {
    pub session: Arc<Session>,
    received: Arc<Mutex<Vec<String>>>,
    output: UnboundedSender<String>,
}

impl FakeDevice {
    /// Start a device that answers each line it receives with
    /// `echo + respond(line) + prompt`. A `None` reply means the device stays
    /// silent, not even echoing.
    pub fn start<F>(respond: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        Self::with_watchers(Watchers::shared(), respond)
    }

    pub fn with_watchers<F>(watchers: Arc<Watchers>, mut respond: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let (transport, mut incoming) = ChannelTransport::pair();
        let (output, chunks) = mpsc::unbounded_channel();
        let session = Session::new("fake", Arc::new(transport), watchers);
        session.spawn_pump(chunks);

        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let out = output.clone();
        tokio::spawn(async move {
            let mut line = String::new();
            while let Some(text) = incoming.recv().await {
                for ch in text.chars() {
                    match ch {
                        '\r' | '\n' => {
                            let command = std::mem::take(&mut line);
                            log.lock().unwrap().push(command.clone());
                            let Some(body) = respond(command.trim()) else {
                                continue;
                            };
                            let mut reply = format!("{command}\r\n");
                            if !body.is_empty() {
                                reply.push_str(&body.replace('\n', "\r\n"));
                                if !body.ends_with('\n') {
                                    reply.push_str("\r\n");
                                }
                            }
                            reply.push_str(PROMPT);
                            for chunk in split_chars(&reply, CHUNK_CHARS) {
                                let _ = out.send(chunk);
                            }
                        }
                        '\u{15}' => line.clear(),
                        c => line.push(c),
                    }
                }
            }
        });

        Self {
            session,
            received,
            output,
        }
    }

    /// A device that answers only the listed commands, with an empty reply
    /// for anything else.
    pub fn scripted(replies: HashMap<String, String>) -> Self {
        Self::start(move |command| Some(replies.get(command).cloned().unwrap_or_default()))
    }

    /// Push unsolicited output, as if the device printed it on its own.
    pub fn emit(&self, text: &str) {
        let _ = self.output.send(text.to_string());
    }

    /// Every non-empty line the device has received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|line| !line.is_empty())
            .cloned()
            .collect()
    }
}

fn split_chars(text: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(n).map(|c| c.iter().collect()).collect()
}

/// Help replies of a small Zephyr shell.
pub fn zephyr_help() -> HashMap<String, String> {
    let pairs = [
        (
            "help",
            "Please press the <Tab> button to see all available commands.\n\
             Available commands:\n  \
             clear    : Clear screen.\n  \
             kernel   : Kernel commands\n  \
             net      : Networking commands\n  \
             reboot   : Reboot the board\n",
        ),
        ("clear --help", "clear - Clear screen.\n"),
        ("reboot --help", "reboot - Reboot the board\n"),
        (
            "kernel --help",
            "kernel - Kernel commands\n\
             Subcommands:\n  \
             uptime   :Kernel uptime.\n  \
             version  :Kernel version.\n",
        ),
        ("kernel uptime --help", "kernel uptime - Kernel uptime.\n"),
        ("kernel version --help", "kernel version - Kernel version.\n"),
        (
            "net --help",
            "net - Networking commands\n\
             Subcommands:\n  \
             iface  :Print information about network interfaces\n  \
             stats  :Show network statistics\n          \
             Usage: net stats [<index>]\n",
        ),
        ("net iface --help", "net iface - Print information about network interfaces\n"),
        (
            "net stats --help",
            "Show network statistics\n\
             Subcommands:\n  \
             all     Show all statistics\n  \
             stats   Same as net stats\n",
        ),
        ("net stats all --help", "net stats all - Show all statistics\n"),
    ];
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
