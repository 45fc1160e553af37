//! Operator console input.
//!
//! Lines from stdin are read on a dedicated thread and forwarded over a
//! channel, so the control loop can poll for a command without blocking a
//! tick and prompts can wait with a timeout.

use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptReply {
    Line(String),
    TimedOut,
    /// Input is closed; no further lines will arrive
    Closed,
}

pub struct Console {
    lines: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

impl Console {
    /// Start forwarding stdin lines.
    pub fn spawn_stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("Console input error: {}", e);
                            return;
                        }
                    }
                }
                debug!("Console input closed");
            });
        if let Err(e) = spawned {
            warn!("Console input unavailable: {}", e);
        }
        Self::from_receiver(rx)
    }

    pub fn from_receiver(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines,
            closed: false,
        }
    }

    /// Next pending line, without waiting.
    pub fn try_next(&mut self) -> Option<String> {
        match self.lines.try_recv() {
            Ok(line) => Some(line),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Wait up to `timeout` for one line.
    pub async fn prompt(&mut self, timeout: Duration) -> PromptReply {
        if self.closed {
            return PromptReply::Closed;
        }
        match tokio::time::timeout(timeout, self.lines.recv()).await {
            Ok(Some(line)) => PromptReply::Line(line.trim().to_string()),
            Ok(None) => {
                self.closed = true;
                PromptReply::Closed
            }
            Err(_) => PromptReply::TimedOut,
        }
    }
}
