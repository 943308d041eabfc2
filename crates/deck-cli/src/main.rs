//! Deck CLI - Command-line control for networked video decks
//!
//! List clips, cue and play them, and watch what the deck reports.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use deck_client::{Deck, DeckBuilder, DeckConfig, DeckEvent};
use deck_core::{ClipTarget, SlotId, StopMode};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod display;

/// Control a networked video deck over its TCP protocol
#[derive(Parser)]
#[command(name = "deck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Deck host name or address
    #[arg(short = 'H', long, global = true, env = "DECK_HOST")]
    host: Option<String>,

    /// Control port
    #[arg(short, long, global = true, env = "DECK_PORT")]
    port: Option<u16>,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List clips on all slots
    Clips {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start playback, optionally of one clip
    Play {
        /// Clip index
        #[arg(long, requires = "slot")]
        clip: Option<u32>,

        /// Slot holding the clip (1-3)
        #[arg(long, requires = "clip")]
        slot: Option<SlotId>,
    },

    /// Stop, then play the clip with this filename
    PlayFile {
        filename: String,
    },

    /// Stop playback
    Stop,

    /// Cue a clip at its first frame
    Prep {
        /// Clip index
        #[arg(long)]
        clip: u32,

        /// Slot holding the clip (defaults to 3)
        #[arg(long)]
        slot: Option<SlotId>,
    },

    /// Set what the output shows when playback stops
    StopMode {
        /// lastframe, nextframe or black
        mode: StopMode,
    },

    /// Print deck events until Ctrl+C
    Watch,

    /// Show the deck's hardware info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.log_level, cli.json_logs)?;

    let config = load_config(cli.config.as_deref(), cli.host, cli.port)?;

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(()).await;
        }
    });

    println!(
        "{} Connecting to {}",
        "DECK".cyan().bold(),
        config.address().yellow()
    );

    let mut builder = DeckBuilder::from_config(config);
    let events = builder.subscribe();
    let deck = builder
        .connect()
        .await
        .context("Failed to connect to deck")?;

    let result = run(&deck, cli.command, events, &mut shutdown_rx).await;
    deck.end().await;
    result
}

async fn run(
    deck: &Deck,
    command: Commands,
    events: broadcast::Receiver<DeckEvent>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    match command {
        Commands::Clips { json } => {
            let clips = deck.clips();
            if json {
                println!("{}", serde_json::to_string_pretty(&clips)?);
            } else {
                display::print_clips(deck, &clips);
            }
        }

        Commands::Play { clip, slot } => {
            let target = match (clip, slot) {
                (Some(index), Some(slot)) => Some(ClipTarget { index, slot }),
                _ => None,
            };
            deck.play(target).await?;
            println!("{} Playing", "OK".green().bold());
        }

        Commands::PlayFile { filename } => {
            let Some(clip) = deck.find_clip(&filename) else {
                bail!("No clip named '{}' on the deck", filename);
            };
            deck.stop().await?;
            deck.play_clip(&clip).await?;
            println!(
                "{} Playing {} (slot {}, clip {})",
                "OK".green().bold(),
                clip.filename.yellow(),
                clip.slot_id,
                clip.index
            );
        }

        Commands::Stop => {
            deck.stop().await?;
            println!("{} Stopped", "OK".green().bold());
        }

        Commands::Prep { clip, slot } => {
            deck.prep_play(clip, slot).await?;
            println!("{} Cued clip {}", "OK".green().bold(), clip);
        }

        Commands::StopMode { mode } => {
            deck.set_stop_mode(mode).await?;
            println!("{} Stop mode set to {}", "OK".green().bold(), mode);
        }

        Commands::Watch => {
            println!(
                "{} Watching deck events, press Ctrl+C to exit",
                "OK".green().bold()
            );
            display::print_clips(deck, &deck.clips());
            watch_events(events, shutdown_rx).await;
        }

        Commands::Info => display::print_info(deck),
    }

    Ok(())
}

async fn watch_events(mut events: broadcast::Receiver<DeckEvent>, shutdown_rx: &mut mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Ok(DeckEvent::Closed) => {
                    display::print_event(&DeckEvent::Closed);
                    break;
                }
                Ok(event) => display::print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("{} missed {} events", "WARN".yellow().bold(), n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Read the config file, if any, then apply host and port overrides
fn load_config(path: Option<&Path>, host: Option<String>, port: Option<u16>) -> Result<DeckConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<DeckConfig>(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => DeckConfig::default(),
    };

    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    Ok(config)
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_play_with_target() {
        let cli = Cli::try_parse_from(["deck", "--host", "10.0.0.40", "play", "--clip", "2", "--slot", "1"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.40"));
        match cli.command {
            Commands::Play { clip, slot } => {
                assert_eq!(clip, Some(2));
                assert_eq!(slot, Some(SlotId::ONE));
            }
            _ => panic!("expected play"),
        }
    }

    #[test]
    fn test_play_clip_requires_slot() {
        assert!(Cli::try_parse_from(["deck", "play", "--clip", "2"]).is_err());
        assert!(Cli::try_parse_from(["deck", "prep", "--clip", "2", "--slot", "4"]).is_err());
    }

    #[test]
    fn test_parse_stop_mode() {
        let cli = Cli::try_parse_from(["deck", "stop-mode", "black"]).unwrap();
        assert!(matches!(cli.command, Commands::StopMode { mode: StopMode::Black }));
        assert!(Cli::try_parse_from(["deck", "stop-mode", "freeze"]).is_err());
    }

    #[test]
    fn test_overrides_apply_without_file() {
        let config = load_config(None, Some("deck.local".into()), Some(4000)).unwrap();
        assert_eq!(config.address(), "deck.local:4000");
        assert_eq!(config.response_timeout_ms, 500);
    }
}
