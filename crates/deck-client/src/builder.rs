//! Client builder pattern

use tokio::sync::broadcast;

use crate::config::{DeckConfig, ReconnectPolicy};
use crate::event::{DeckEvent, EventBus};
use crate::{Deck, Result};

/// Builder for a [`Deck`] connection
pub struct DeckBuilder {
    config: DeckConfig,
    events: Option<EventBus>,
}

impl DeckBuilder {
    /// Create a new builder for the deck at `host`
    pub fn new(host: &str) -> Self {
        Self::from_config(DeckConfig::new(host))
    }

    /// Start from a loaded configuration
    pub fn from_config(config: DeckConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Set the control port (default 9993)
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set how long a command waits for its reply before being resent
    pub fn response_timeout_ms(mut self, ms: u64) -> Self {
        self.config.response_timeout_ms = ms;
        self
    }

    /// Set the pause between a reply and the next queued command
    pub fn dispatch_delay_ms(mut self, ms: u64) -> Self {
        self.config.dispatch_delay_ms = ms;
        self
    }

    /// Set how many resends a command gets
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set how many commands may wait behind the one in flight
    pub fn max_backlog(mut self, backlog: usize) -> Self {
        self.config.max_backlog = backlog;
        self
    }

    /// Set the quiet period before clips are re-read after a slot change
    pub fn refresh_debounce_ms(mut self, ms: u64) -> Self {
        self.config.refresh_debounce_ms = ms;
        self
    }

    /// Set how long `end()` waits for the deck to hang up
    pub fn close_timeout_ms(mut self, ms: u64) -> Self {
        self.config.close_timeout_ms = ms;
        self
    }

    /// Set the frame rate used for clip lengths
    pub fn fps(mut self, fps: u32) -> Self {
        self.config.fps = fps;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Subscribe before connecting, so bootstrap events are not missed
    pub fn subscribe(&mut self) -> broadcast::Receiver<DeckEvent> {
        let capacity = self.config.event_capacity;
        self.events
            .get_or_insert_with(|| EventBus::new(capacity))
            .subscribe()
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }

    /// Build and connect, waiting for the bootstrap to finish
    pub async fn connect(self) -> Result<Deck> {
        let deck = self.start();
        deck.wait_connected().await?;
        Ok(deck)
    }

    /// Build and start connecting in the background
    pub fn start(self) -> Deck {
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_capacity));
        Deck::start(self.config, events)
    }
}
