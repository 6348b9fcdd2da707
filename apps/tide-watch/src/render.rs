use std::io::{self, Write};

use beach_tide::{SubscriptionState, Topic};
use clap::ValueEnum;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One `{"topic":..,"payload":..}` object per line.
    Json,
    /// Human-readable lines; notifications render as `title: message`.
    Text,
}

/// Payload shape of notification channels such as `SystemNotification`.
#[derive(Debug, Deserialize)]
struct Notification {
    title: String,
    message: String,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    topic: &'a Topic,
    payload: &'a Value,
}

/// Writes decoded payloads to an output stream, one line per event.
pub struct Renderer<W: Write + Send> {
    format: OutputFormat,
    out: Mutex<W>,
}

impl Renderer<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, io::stdout())
    }
}

impl<W: Write + Send> Renderer<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self {
            format,
            out: Mutex::new(out),
        }
    }

    pub fn render(&self, payload: &Value, topic: &Topic) {
        let line = match self.format {
            OutputFormat::Json => match serde_json::to_string(&JsonLine { topic, payload }) {
                Ok(line) => line,
                Err(err) => {
                    warn!(
                        target = "tide.watch",
                        topic = %topic,
                        error = %err,
                        "failed to serialize event; skipping"
                    );
                    return;
                }
            },
            OutputFormat::Text => match Notification::deserialize(payload) {
                Ok(notice) => format!("[{topic}] {}: {}", notice.title, notice.message),
                Err(_) => format!("[{topic}] {payload}"),
            },
        };
        self.write_line(&line);
    }

    /// Connection-status feedback; only shown in text mode so JSON output
    /// stays machine-readable.
    pub fn connection_state(&self, topic: &Topic, state: SubscriptionState) {
        if self.format == OutputFormat::Text {
            let label = match state {
                SubscriptionState::Connecting => "connecting",
                SubscriptionState::Open => "connected",
                SubscriptionState::Error => "connection lost, waiting for reconnect",
                SubscriptionState::Closed => "closed",
            };
            self.write_line(&format!("[{topic}] -- {label}"));
        }
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock();
        if let Err(err) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!(target = "tide.watch", error = %err, "failed to write event");
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner()
    }
}
