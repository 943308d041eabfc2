//! Main deck client implementation

use deck_core::{Clip, ClipTarget, Command, Payload, SlotId, SlotStatus, StopMode};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::builder::DeckBuilder;
use crate::cache::DeviceState;
use crate::config::DeckConfig;
use crate::driver::{CommandHandle, Driver};
use crate::error::{ClientError, Result};
use crate::event::{ConnectionState, DeckEvent, EventBus};

/// Slot used by [`Deck::prep_play`] when none is given
pub const DEFAULT_PREP_SLOT: SlotId = SlotId::THREE;

/// A connection to one deck.
///
/// Cloning is cheap; clones share the connection. The connection is closed
/// by [`Deck::end`], or once every clone has been dropped.
#[derive(Clone)]
pub struct Deck {
    config: Arc<DeckConfig>,
    commands: CommandHandle,
    state: Arc<RwLock<DeviceState>>,
    connection: watch::Receiver<ConnectionState>,
    events: EventBus,
}

impl Deck {
    /// Create a builder
    pub fn builder(host: &str) -> DeckBuilder {
        DeckBuilder::new(host)
    }

    /// Connect with default settings and wait for the bootstrap to finish
    pub async fn connect(host: &str) -> Result<Self> {
        DeckBuilder::new(host).connect().await
    }

    /// Start the driver without waiting for it
    pub(crate) fn start(config: DeckConfig, events: EventBus) -> Self {
        info!("Starting deck client for {}", config.address());
        let (commands, connection, state) = Driver::spawn(config.clone(), events.clone());
        Self {
            config: Arc::new(config),
            commands,
            state,
            connection,
            events,
        }
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }

    /// `host:port` of the deck
    pub fn address(&self) -> String {
        self.config.address()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Queue a raw command and wait for the deck to acknowledge it
    pub async fn send_command(&self, command: Command) -> Result<Payload> {
        debug!("Submitting deck command: {}", command);
        self.commands.send(command).await
    }

    /// Start playback.
    ///
    /// Without a target the current clip plays once and the output goes to
    /// black. With a target the clip is selected, cued and played once.
    pub async fn play(&self, target: Option<ClipTarget>) -> Result<()> {
        match target {
            None => {
                self.send_command(Command::PlayStopBlackSingleClip).await?;
            }
            Some(ClipTarget { index, slot }) => {
                self.cue(index, slot).await?;
                self.send_command(Command::PlaySingleClip).await?;
            }
        }
        Ok(())
    }

    /// Play a clip from the cache
    pub async fn play_clip(&self, clip: &Clip) -> Result<()> {
        self.play(Some(clip.target())).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send_command(Command::Stop).await?;
        Ok(())
    }

    /// Cue a clip at its first frame without playing it
    pub async fn prep_play(&self, index: u32, slot: Option<SlotId>) -> Result<()> {
        self.cue(index, slot.unwrap_or(DEFAULT_PREP_SLOT)).await
    }

    pub async fn set_stop_mode(&self, stop_mode: StopMode) -> Result<()> {
        self.send_command(Command::PlayOption { stop_mode }).await?;
        Ok(())
    }

    /// Re-read a slot's status and clips now, bypassing notifications
    pub async fn refresh_slot(&self, slot: SlotId) -> Result<Vec<Clip>> {
        let session = self.commands.session();
        self.send_command(Command::SlotSelect(slot)).await?;
        let payload = self.send_command(Command::SlotInfo).await?;
        let status = SlotStatus::from_field(payload.as_block().and_then(|b| b.get("status")));

        self.send_command(Command::SlotSelect(slot)).await?;
        let payload = self.send_command(Command::ClipsGet).await?;
        let (clips, invalid) = crate::cache::parse_clip_catalog(slot, &payload, Some(self.config.fps))?;
        for e in invalid {
            self.events.error(format!("Invalid clip data from deck: {}", e));
        }

        self.commands.store(session, slot, status, clips.clone()).await?;
        Ok(clips)
    }

    /// End the connection.
    ///
    /// Pending commands fail with [`ClientError::Closed`]. The deck is asked
    /// to hang up; if it has not within the close timeout the socket is
    /// closed from this side.
    pub async fn end(&self) {
        self.commands.close().await;
    }

    async fn cue(&self, index: u32, slot: SlotId) -> Result<()> {
        self.send_command(Command::SlotSelect(slot)).await?;
        self.send_command(Command::PlayrangeSet { clip_id: index }).await?;
        self.send_command(Command::GotoClipStart).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cached state
    // ------------------------------------------------------------------

    /// All known clips, slot 1 first
    pub fn clips(&self) -> Vec<Clip> {
        self.state.read().clips()
    }

    /// Find a clip by filename
    pub fn find_clip(&self, filename: &str) -> Option<Clip> {
        self.state.read().find_clip(filename).cloned()
    }

    pub fn slot_status(&self, slot: SlotId) -> SlotStatus {
        self.state.read().slot(slot).status
    }

    /// Fields of the deck's `connection info` banner
    pub fn hardware_info(&self) -> HashMap<String, String> {
        self.state.read().hardware_info().clone()
    }

    /// Last transport status the deck reported
    pub fn transport_status(&self) -> Option<String> {
        self.state.read().transport_status().map(str::to_string)
    }

    /// Snapshot of the whole cache
    pub fn snapshot(&self) -> DeviceState {
        self.state.read().clone()
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receive events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeckEvent> {
        self.events.subscribe()
    }

    /// Wait until the connection reaches `target` or closes.
    ///
    /// Returns the state it settled in.
    pub async fn wait_for_state(&self, target: ConnectionState) -> ConnectionState {
        let mut connection = self.connection.clone();
        let result = connection
            .wait_for(|state| *state == target || *state == ConnectionState::Closed)
            .await;
        match result {
            Ok(state) => *state,
            // Driver gone
            Err(_) => ConnectionState::Closed,
        }
    }

    /// Wait for the bootstrap, failing if the connection closes first
    pub(crate) async fn wait_connected(&self) -> Result<()> {
        match self.wait_for_state(ConnectionState::Connected).await {
            ConnectionState::Connected => Ok(()),
            _ => Err(ClientError::ConnectionFailed(format!(
                "could not connect to deck at {}",
                self.address()
            ))),
        }
    }
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}
