//! Terminal consumer of the monitor
//!
//! Subscribes to the [`IngestionBridge`] and prints one coloured row for every stored
//! message that passes the current filter. Connection changes and notices go to the log.

use std::fmt::Write as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{
    ConnectionState, DisplayIdentity, IngestionBridge, Message, MonitorEvent, PublisherEntry,
    PALETTE_SIZE,
};

const RESET: &str = "\x1b[0m";

/// One ANSI foreground colour per palette slot
const PALETTE: [&str; PALETTE_SIZE] = [
    "\x1b[31m", "\x1b[32m", "\x1b[33m", "\x1b[34m", "\x1b[35m", "\x1b[36m", "\x1b[91m",
    "\x1b[92m",
];

pub fn colour(identity: DisplayIdentity) -> &'static str {
    PALETTE[identity.slot()]
}

/// `time  QoS  R  topic  preview`, with the topic coloured by its publisher slot
pub fn render_row(message: &Message, identity: Option<DisplayIdentity>, use_colour: bool) -> String {
    let topic = match identity {
        Some(identity) if use_colour => format!("{}{}{}", colour(identity), message.topic(), RESET),
        _ => message.topic().to_string(),
    };
    format!(
        "{}  QoS={}  {:1}  {}  {}",
        message.timestamp_label(),
        message.qos(),
        message.retain_marker(),
        topic,
        message.preview()
    )
}

/// Table of publishers in first-seen order, dormant ones marked
pub fn render_publishers(publishers: &[PublisherEntry]) -> String {
    let mut out = String::new();
    let width = publishers
        .iter()
        .map(|p| p.topic.chars().count())
        .max()
        .unwrap_or(0);
    for entry in publishers {
        let _ = writeln!(
            out,
            "{:>3}  {:<width$}  {:>6}{}",
            entry.identity.ordinal(),
            entry.topic,
            entry.count,
            if entry.is_dormant() { "  (dormant)" } else { "" },
            width = width
        );
    }
    out
}

pub struct Console {
    bridge: IngestionBridge,
    events: mpsc::UnboundedReceiver<MonitorEvent>,
    use_colour: bool,
    printed: usize,
}

impl Console {
    pub fn new(bridge: IngestionBridge, use_colour: bool) -> Self {
        let events = bridge.subscribe();
        Self {
            bridge,
            events,
            use_colour,
            printed: 0,
        }
    }

    /// Spawns the console on its own task, resolving to the number of printed rows
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Console cancelled");
                    break;
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            if let Some(line) = self.handle_event(event) {
                                println!("{}", line);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        self.printed
    }

    /// Returns the row to print, if any
    pub fn handle_event(&mut self, event: MonitorEvent) -> Option<String> {
        match event {
            MonitorEvent::DataChanged(change) => {
                let message = change.inserted;
                if !self.bridge.filter().matches(&message) {
                    return None;
                }
                let identity = self.bridge.identity(message.topic());
                self.printed += 1;
                Some(render_row(&message, identity, self.use_colour))
            }
            MonitorEvent::Cleared { removed } => {
                info!("Cleared {} messages", removed);
                None
            }
            MonitorEvent::ConnectionChanged(ConnectionState::Error(reason)) => {
                warn!("Connection error: {}", reason);
                None
            }
            MonitorEvent::ConnectionChanged(state) => {
                info!("Connection: {}", state);
                None
            }
            MonitorEvent::Notice(notice) => {
                warn!("{}", notice);
                None
            }
        }
    }

    pub fn printed(&self) -> usize {
        self.printed
    }
}
