//! Deck data types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::timecode::timecode_to_millis;

/// One of the deck's three storage slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotId(u8);

impl SlotId {
    pub const ONE: SlotId = SlotId(1);
    pub const TWO: SlotId = SlotId(2);
    pub const THREE: SlotId = SlotId(3);

    /// All slots in ascending order
    pub const ALL: [SlotId; 3] = [SlotId::ONE, SlotId::TWO, SlotId::THREE];

    pub fn new(id: u8) -> Option<Self> {
        (1..=3).contains(&id).then_some(Self(id))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based position, for per-slot arrays
    pub fn index(&self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for SlotId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        SlotId::new(id).ok_or_else(|| Error::InvalidSlot(id.to_string()))
    }
}

impl From<SlotId> for u8 {
    fn from(slot: SlotId) -> u8 {
        slot.0
    }
}

impl FromStr for SlotId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(SlotId::ONE),
            "2" => Ok(SlotId::TWO),
            "3" => Ok(SlotId::THREE),
            _ => Err(Error::InvalidSlot(s.to_string())),
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mount status of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    #[default]
    Empty,
    Mounted,
}

impl SlotStatus {
    /// Interpret the `status` field of a slot info block; anything other
    /// than `mounted` counts as empty
    pub fn from_field(value: Option<&str>) -> Self {
        match value {
            Some("mounted") => SlotStatus::Mounted,
            _ => SlotStatus::Empty,
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Empty => write!(f, "empty"),
            SlotStatus::Mounted => write!(f, "mounted"),
        }
    }
}

/// What the deck shows when playback stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    LastFrame,
    NextFrame,
    Black,
}

impl StopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMode::LastFrame => "lastframe",
            StopMode::NextFrame => "nextframe",
            StopMode::Black => "black",
        }
    }
}

impl FromStr for StopMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lastframe" => Ok(StopMode::LastFrame),
            "nextframe" => Ok(StopMode::NextFrame),
            "black" => Ok(StopMode::Black),
            _ => Err(Error::InvalidStopMode(s.to_string())),
        }
    }
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded clip on one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub filename: String,
    /// Duration in milliseconds
    pub length: u64,
    /// Start timecode as reported by the deck
    pub start_time: String,
    /// Device-assigned index, unique within the slot
    pub index: u32,
    pub slot_id: SlotId,
}

impl Clip {
    /// Parse one row of a clip catalog.
    ///
    /// The value is `<filename> <start timecode> <length timecode>`; it is
    /// split from the right because filenames may contain spaces.
    pub fn parse_row(slot_id: SlotId, index: u32, value: &str, fps: Option<u32>) -> Result<Self, Error> {
        let invalid = || Error::InvalidClipData(value.to_string());

        let (rest, length) = value.rsplit_once(' ').ok_or_else(invalid)?;
        let (filename, start_time) = rest.rsplit_once(' ').ok_or_else(invalid)?;

        Ok(Self {
            filename: filename.to_string(),
            length: timecode_to_millis(length, fps),
            start_time: start_time.to_string(),
            index,
            slot_id,
        })
    }

    /// Address of this clip for playback commands
    pub fn target(&self) -> ClipTarget {
        ClipTarget {
            index: self.index,
            slot: self.slot_id,
        }
    }
}

/// Identifies a clip for playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipTarget {
    pub index: u32,
    pub slot: SlotId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_bounds() {
        assert!(SlotId::new(0).is_none());
        assert!(SlotId::new(4).is_none());
        assert_eq!(SlotId::new(2), Some(SlotId::TWO));
        assert_eq!("3".parse::<SlotId>().unwrap().index(), 2);
        assert!("03".parse::<SlotId>().is_err());
    }

    #[test]
    fn test_slot_status_from_field() {
        assert_eq!(SlotStatus::from_field(Some("mounted")), SlotStatus::Mounted);
        assert_eq!(SlotStatus::from_field(Some("empty")), SlotStatus::Empty);
        assert_eq!(SlotStatus::from_field(Some("error")), SlotStatus::Empty);
        assert_eq!(SlotStatus::from_field(None), SlotStatus::Empty);
    }

    #[test]
    fn test_stop_mode_names() {
        for mode in [StopMode::LastFrame, StopMode::NextFrame, StopMode::Black] {
            assert_eq!(mode.as_str().parse::<StopMode>().unwrap(), mode);
        }
        assert!("freeze".parse::<StopMode>().is_err());
    }

    #[test]
    fn test_clip_row_with_spaces_in_filename() {
        let clip = Clip::parse_row(SlotId::ONE, 4, "My Intro Take 2.mov 00:00:00:00 00:00:12:30", None).unwrap();
        assert_eq!(clip.filename, "My Intro Take 2.mov");
        assert_eq!(clip.start_time, "00:00:00:00");
        assert_eq!(clip.length, 12_500);
        assert_eq!(clip.index, 4);
        assert_eq!(clip.target(), ClipTarget { index: 4, slot: SlotId::ONE });
    }

    #[test]
    fn test_clip_row_missing_fields() {
        assert!(Clip::parse_row(SlotId::ONE, 1, "00:00:10:00", None).is_err());
        assert!(Clip::parse_row(SlotId::ONE, 1, "a.mov 00:00:10:00", None).is_err());
    }
}
