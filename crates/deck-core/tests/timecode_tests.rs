//! Timecode and clip row tests

use deck_core::{timecode_to_millis, Clip, SlotId, Timecode, DEFAULT_FPS};

#[test]
fn test_reference_timecode() {
    assert_eq!(timecode_to_millis("01:02:03:30", Some(DEFAULT_FPS)), 3_723_500);
}

#[test]
fn test_unpadded_field_is_zero() {
    assert_eq!(timecode_to_millis("1:02:03:30", None), 0);
    assert_eq!(timecode_to_millis("01:2:03:30", None), 0);
    assert_eq!(timecode_to_millis("01:02:3:30", None), 0);
    assert_eq!(timecode_to_millis("01:02:03:3", None), 0);
}

#[test]
fn test_strict_parse_reports_error() {
    let err = "1:02:03:30".parse::<Timecode>().unwrap_err();
    assert!(err.to_string().contains("1:02:03:30"));
}

#[test]
fn test_other_frame_rates() {
    assert_eq!(timecode_to_millis("00:00:01:12", Some(24)), 1_500);
    assert_eq!(timecode_to_millis("00:00:00:29", Some(30)), 967);
    assert_eq!(timecode_to_millis("00:00:00:00", Some(0)), 0);
}

#[test]
fn test_display_roundtrip() {
    let tc: Timecode = "10:20:30:40".parse().unwrap();
    assert_eq!(tc.hours, 10);
    assert_eq!(tc.frames, 40);
    assert_eq!(tc.to_string(), "10:20:30:40");
}

#[test]
fn test_clip_row_length_uses_fps() {
    let at_60 = Clip::parse_row(SlotId::ONE, 1, "x.mov 00:00:00:00 00:00:01:30", None).unwrap();
    let at_30 = Clip::parse_row(SlotId::ONE, 1, "x.mov 00:00:00:00 00:00:01:15", Some(30)).unwrap();
    assert_eq!(at_60.length, 1_500);
    assert_eq!(at_30.length, 1_500);
}

#[test]
fn test_clip_row_bad_length_timecode() {
    let clip = Clip::parse_row(SlotId::THREE, 2, "x.mov 00:00:00:00 garbage", None).unwrap();
    assert_eq!(clip.length, 0);
    assert_eq!(clip.slot_id, SlotId::THREE);
}
