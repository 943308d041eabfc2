//! Connection state and the public event stream

use deck_core::Clip;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Lifecycle of a deck connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, socket not opened yet
    Initializing,
    /// Socket opening, bootstrap running, or reconnecting
    Connecting,
    /// Bootstrap finished
    Connected,
    Closed,
}

/// Events published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum DeckEvent {
    /// Something went wrong that no caller is waiting on
    Error(String),
    /// Operational notice (queued commands, retries, reconnects)
    Info(String),
    /// Bootstrap finished
    Connected,
    /// A slot's clip list was refreshed; carries all clips
    Clips(Vec<Clip>),
    /// Transport status reported by the deck (play, stopped, ...)
    Transport(String),
    /// The connection is gone for good
    Closed,
}

/// Fan-out for [`DeckEvent`]s that also logs what it publishes
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<DeckEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DeckEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: DeckEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.emit(DeckEvent::Error(message));
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(DeckEvent::Info(message));
    }
}
