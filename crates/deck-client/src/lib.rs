//! Deck Client Library
//!
//! High-level async client for networked tape-style video decks.
//!
//! Commands are queued and sent one at a time, retried when the deck stays
//! silent, and answered in order. Slot, clip and transport state is cached
//! and kept current from the deck's notifications.
//!
//! # Example
//!
//! ```ignore
//! use deck_client::Deck;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let deck = Deck::connect("10.0.0.40").await?;
//!
//!     let mut events = deck.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     if let Some(clip) = deck.find_clip("intro.mov") {
//!         deck.play_clip(&clip).await?;
//!     }
//!
//!     deck.end().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod client;
pub mod config;
mod driver;
pub mod error;
pub mod event;
mod sequencer;

pub use builder::DeckBuilder;
pub use cache::{parse_clip_catalog, DeviceState, SlotState};
pub use client::{Deck, DEFAULT_PREP_SLOT};
pub use config::{DeckConfig, ReconnectPolicy};
pub use error::{ClientError, Result};
pub use event::{ConnectionState, DeckEvent};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::DeckBuilder;
    pub use crate::client::Deck;
    pub use crate::error::{ClientError, Result};
    pub use crate::event::{ConnectionState, DeckEvent};
    pub use deck_core::{Clip, ClipTarget, Command, SlotId, SlotStatus, StopMode};
}
