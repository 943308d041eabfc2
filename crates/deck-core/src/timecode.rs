//! Timecode handling
//!
//! Clip positions and durations arrive as `HH:MM:SS:FF`. Drop-frame
//! material uses `;` for some or all separators (usually `HH:MM:SS;FF`);
//! either character is accepted anywhere. Every field must be exactly two
//! ASCII digits.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::DEFAULT_FPS;

/// A parsed timecode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timecode {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub frames: u32,
    pub drop_frame: bool,
}

impl Timecode {
    /// Convert to milliseconds at the given frame rate.
    ///
    /// The frame part is rounded half up to the nearest millisecond.
    pub fn to_millis(&self, fps: u32) -> u64 {
        let fps = u64::from(fps.max(1));
        let frames_ms = (u64::from(self.frames) * 2000 + fps) / (2 * fps);
        u64::from(self.hours) * 3_600_000
            + u64::from(self.minutes) * 60_000
            + u64::from(self.seconds) * 1000
            + frames_ms
    }
}

impl FromStr for Timecode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidTimecode(s.to_string());

        let mut parts = s.split([':', ';']);
        let hours = parts.next().and_then(two_digits).ok_or_else(invalid)?;
        let minutes = parts.next().and_then(two_digits).ok_or_else(invalid)?;
        let seconds = parts.next().and_then(two_digits).ok_or_else(invalid)?;
        let frames = parts.next().and_then(two_digits).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        let drop_frame = s.contains(';');

        Ok(Self {
            hours,
            minutes,
            seconds,
            frames,
            drop_frame,
        })
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}

fn two_digits(field: &str) -> Option<u32> {
    if field.len() != 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Convert a timecode string to milliseconds, yielding 0 when it is malformed.
///
/// Use [`Timecode::from_str`] to get the error instead.
pub fn timecode_to_millis(timecode: &str, fps: Option<u32>) -> u64 {
    timecode
        .parse::<Timecode>()
        .map(|tc| tc.to_millis(fps.unwrap_or(DEFAULT_FPS)))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_millis() {
        assert_eq!(timecode_to_millis("01:02:03:30", None), 3_723_500);
        assert_eq!(timecode_to_millis("00:00:10:00", Some(25)), 10_000);
    }

    #[test]
    fn test_frames_round_half_up() {
        // 1 frame at 48 fps is 20.833ms
        assert_eq!(timecode_to_millis("00:00:00:01", Some(48)), 21);
        // 1 frame at 80 fps is exactly 12.5ms
        assert_eq!(timecode_to_millis("00:00:00:01", Some(80)), 13);
    }

    #[test]
    fn test_drop_frame_separator() {
        let tc: Timecode = "00:01:00;02".parse().unwrap();
        assert!(tc.drop_frame);
        assert_eq!(tc.to_string(), "00:01:00;02");
        assert_eq!(timecode_to_millis("00:01:00;30", None), 60_500);
    }

    #[test]
    fn test_semicolon_in_any_position() {
        let tc: Timecode = "01:02;03:04".parse().unwrap();
        assert!(tc.drop_frame);
        assert_eq!((tc.hours, tc.minutes, tc.seconds, tc.frames), (1, 2, 3, 4));
        assert_eq!(timecode_to_millis("01;02;03;30", None), 3_723_500);
        assert_eq!(timecode_to_millis("01:02;03:30", None), 3_723_500);
    }

    #[test]
    fn test_malformed_yields_zero() {
        for bad in ["1:02:03:30", "01:02:03:3", "001:02:03:30", "01:02:03", "", "aa:bb:cc:dd", "01:02:03:04:05"] {
            assert_eq!(timecode_to_millis(bad, None), 0, "{bad}");
            assert!(bad.parse::<Timecode>().is_err(), "{bad}");
        }
    }
}
