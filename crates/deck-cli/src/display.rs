//! Terminal output

use colored::Colorize;
use deck_client::{Deck, DeckEvent};
use deck_core::{Clip, SlotId, SlotStatus};

pub fn print_clips(deck: &Deck, clips: &[Clip]) {
    for slot in SlotId::ALL {
        let status = match deck.slot_status(slot) {
            SlotStatus::Mounted => "mounted".green(),
            SlotStatus::Empty => "empty".dimmed(),
        };
        println!("{} {} ({})", "Slot".cyan().bold(), slot, status);

        let mut any = false;
        for clip in clips.iter().filter(|c| c.slot_id == slot) {
            any = true;
            println!(
                "  {:>3}  {:<40} {:>10}  {}",
                clip.index,
                clip.filename,
                format_length(clip.length),
                clip.start_time.dimmed()
            );
        }
        if !any {
            println!("  {}", "no clips".dimmed());
        }
    }
}

pub fn print_event(event: &DeckEvent) {
    match event {
        DeckEvent::Error(message) => println!("{} {}", "ERROR".red().bold(), message),
        DeckEvent::Info(message) => println!("{} {}", "INFO".blue().bold(), message),
        DeckEvent::Connected => println!("{} connected", "DECK".cyan().bold()),
        DeckEvent::Clips(clips) => println!("{} {} clips", "CLIPS".green().bold(), clips.len()),
        DeckEvent::Transport(status) => {
            println!("{} {}", "TRANSPORT".magenta().bold(), status.yellow())
        }
        DeckEvent::Closed => println!("{} connection closed", "DECK".cyan().bold()),
    }
}

pub fn print_info(deck: &Deck) {
    println!("{}", "Deck".cyan().bold());
    println!("Address:    {}", deck.address());

    let mut info: Vec<_> = deck.hardware_info().into_iter().collect();
    info.sort();
    for (key, value) in info {
        println!("{:<12}{}", format!("{}:", key), value);
    }

    if let Some(status) = deck.transport_status() {
        println!("Transport:  {}", status.yellow());
    }
    println!("Clips:      {}", deck.clips().len());
}

/// `m:ss.mmm` for a clip length in milliseconds
fn format_length(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{}:{:02}.{:03}", minutes, seconds, ms % 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_length() {
        assert_eq!(format_length(0), "0:00.000");
        assert_eq!(format_length(60_500), "1:00.500");
        assert_eq!(format_length(3_723_500), "62:03.500");
    }
}
