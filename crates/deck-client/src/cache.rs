//! Device state cache
//!
//! Mirrors what the deck has told us: per-slot mount status and clips, the
//! hardware info from the connection banner, and the last transport status.
//! The driver task is the only writer; [`crate::Deck`] hands out snapshots.

use deck_core::{Clip, Payload, ProtocolMessage, SlotId, SlotStatus, StatusCode, SLOT_COUNT};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{ClientError, Result};
use crate::event::{DeckEvent, EventBus};

/// Block name of the `clips get` reply
const CLIPS_BLOCK: &str = "clips info";

/// Status and clips of one slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotState {
    pub status: SlotStatus,
    pub clips: Vec<Clip>,
}

/// Snapshot of everything known about the deck
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    slots: [SlotState; SLOT_COUNT],
    hardware_info: HashMap<String, String>,
    transport_status: Option<String>,
}

impl DeviceState {
    pub fn slot(&self, slot: SlotId) -> &SlotState {
        &self.slots[slot.index()]
    }

    /// All clips, slot 1 first, each slot in index order
    pub fn clips(&self) -> Vec<Clip> {
        self.slots
            .iter()
            .flat_map(|slot| slot.clips.iter().cloned())
            .collect()
    }

    /// First clip with this filename, searching slot 1 first
    pub fn find_clip(&self, filename: &str) -> Option<&Clip> {
        self.slots
            .iter()
            .flat_map(|slot| slot.clips.iter())
            .find(|clip| clip.filename == filename)
    }

    pub fn hardware_info(&self) -> &HashMap<String, String> {
        &self.hardware_info
    }

    pub fn transport_status(&self) -> Option<&str> {
        self.transport_status.as_deref()
    }

    /// Replace a slot's status and clips together
    pub(crate) fn commit_slot(&mut self, slot: SlotId, status: SlotStatus, clips: Vec<Clip>) {
        self.slots[slot.index()] = SlotState { status, clips };
    }
}

/// Debounces clip re-queries triggered by slot notifications.
///
/// A deck mounting media sends bursts of slot notifications. Each status
/// change pushes the slot's deadline back, so a burst collapses into one
/// refresh once the slot has been quiet for the debounce window.
#[derive(Debug)]
pub(crate) struct RefreshScheduler {
    debounce: Duration,
    /// Status of the newest scheduled or running refresh, per slot
    expected: [Option<SlotStatus>; SLOT_COUNT],
    due: [Option<Instant>; SLOT_COUNT],
}

impl RefreshScheduler {
    pub(crate) fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            expected: [None; SLOT_COUNT],
            due: [None; SLOT_COUNT],
        }
    }

    /// Record a reported status; returns whether a refresh was (re)scheduled
    pub(crate) fn observe(
        &mut self,
        slot: SlotId,
        status: SlotStatus,
        cached: SlotStatus,
        now: Instant,
    ) -> bool {
        let i = slot.index();
        let latest = self.expected[i].unwrap_or(cached);
        if status == latest {
            return false;
        }
        self.expected[i] = Some(status);
        self.due[i] = Some(now + self.debounce);
        true
    }

    /// Slots whose quiet period is over, with the status to commit
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<(SlotId, SlotStatus)> {
        let mut ready = Vec::new();
        for slot in SlotId::ALL {
            let i = slot.index();
            if matches!(self.due[i], Some(at) if now >= at) {
                self.due[i] = None;
                if let Some(status) = self.expected[i] {
                    ready.push((slot, status));
                }
            }
        }
        ready
    }

    /// A refresh landed; forget it unless a newer one is already queued
    pub(crate) fn committed(&mut self, slot: SlotId, status: SlotStatus) {
        let i = slot.index();
        if self.due[i].is_none() && self.expected[i] == Some(status) {
            self.expected[i] = None;
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.due.iter().flatten().min().copied()
    }

    pub(crate) fn reset(&mut self) {
        self.expected = [None; SLOT_COUNT];
        self.due = [None; SLOT_COUNT];
    }
}

/// Writer side of the cache, owned by the driver
pub(crate) struct DeviceCache {
    state: Arc<RwLock<DeviceState>>,
    scheduler: RefreshScheduler,
    events: EventBus,
}

impl DeviceCache {
    pub(crate) fn new(state: Arc<RwLock<DeviceState>>, debounce: Duration, events: EventBus) -> Self {
        Self {
            state,
            scheduler: RefreshScheduler::new(debounce),
            events,
        }
    }

    /// Apply an unsolicited 5xx message
    pub(crate) fn on_notification(&mut self, message: &ProtocolMessage, now: Instant) {
        match message.code {
            StatusCode::CONNECTION_INFO => match message.named_block("connection info") {
                Some(block) => {
                    info!("Deck hardware: {:?}", block.get("model").unwrap_or("unknown"));
                    self.state.write().hardware_info = block.to_map();
                }
                None => self
                    .events
                    .error(format!("Unknown connection message from deck: {}", message)),
            },
            StatusCode::SLOT_NOTIFY => match message.named_block("slot info") {
                Some(block) => {
                    let slot = block.get("slot id").and_then(|id| id.parse::<SlotId>().ok());
                    let Some(slot) = slot else {
                        debug!("Slot notification without a usable slot id: {}", message);
                        return;
                    };
                    let status = SlotStatus::from_field(block.get("status"));
                    let cached = self.state.read().slot(slot).status;
                    if self.scheduler.observe(slot, status, cached, now) {
                        debug!("Slot {} is now {}, clips refresh scheduled", slot, status);
                    }
                }
                None => self
                    .events
                    .error(format!("Unknown slot message from deck: {}", message)),
            },
            StatusCode::TRANSPORT_NOTIFY => match message.named_block("transport info") {
                Some(block) => {
                    if let Some(status) = block.get("status") {
                        self.state.write().transport_status = Some(status.to_string());
                        self.events.emit(DeckEvent::Transport(status.to_string()));
                    }
                }
                None => self
                    .events
                    .error(format!("Unknown transport message from deck: {}", message)),
            },
            _ => self
                .events
                .error(format!("Unknown response from deck: {}", message)),
        }
    }

    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<(SlotId, SlotStatus)> {
        self.scheduler.take_due(now)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Store a bootstrap or refresh result
    pub(crate) fn commit_slot(&mut self, slot: SlotId, status: SlotStatus, clips: Vec<Clip>) {
        self.state.write().commit_slot(slot, status, clips);
        self.scheduler.committed(slot, status);
    }

    pub(crate) fn clips(&self) -> Vec<Clip> {
        self.state.read().clips()
    }

    /// Forget pending refreshes; used when a session ends
    pub(crate) fn reset_refreshes(&mut self) {
        self.scheduler.reset();
    }
}

/// Parse a `205 clips info` payload into clips ordered by index.
///
/// Rows that cannot be parsed are returned alongside the clips so the caller
/// can report them; they never fail the whole catalog.
pub fn parse_clip_catalog(
    slot: SlotId,
    payload: &Payload,
    fps: Option<u32>,
) -> Result<(Vec<Clip>, Vec<deck_core::Error>)> {
    let block = payload
        .as_block()
        .filter(|block| block.name == CLIPS_BLOCK)
        .ok_or_else(|| ClientError::UnexpectedReply(format!("expected {}, got '{}'", CLIPS_BLOCK, payload.summary())))?;

    let mut rows: HashMap<u32, &str> = HashMap::new();
    for (key, value) in block.fields() {
        if let Some(index) = clip_index(key) {
            rows.insert(index, value);
        }
    }

    let mut indices: Vec<u32> = rows.keys().copied().collect();
    indices.sort_unstable();

    let mut clips = Vec::with_capacity(indices.len());
    let mut invalid = Vec::new();
    for index in indices {
        match Clip::parse_row(slot, index, rows[&index], fps) {
            Ok(clip) => clips.push(clip),
            Err(e) => invalid.push(e),
        }
    }

    Ok((clips, invalid))
}

/// Keys written as a plain unsigned integer name clip rows
fn clip_index(key: &str) -> Option<u32> {
    let index = key.parse::<u32>().ok()?;
    (index.to_string() == key).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::Block;

    fn slot_notify(slot: &str, status: &str) -> ProtocolMessage {
        ProtocolMessage::block(
            StatusCode::SLOT_NOTIFY,
            Block::new("slot info")
                .with_field("slot id", slot)
                .with_field("status", status),
        )
    }

    fn cache() -> (DeviceCache, tokio::sync::broadcast::Receiver<DeckEvent>) {
        let events = EventBus::new(16);
        let rx = events.subscribe();
        let cache = DeviceCache::new(
            Arc::new(RwLock::new(DeviceState::default())),
            Duration::from_millis(200),
            events,
        );
        (cache, rx)
    }

    #[test]
    fn test_catalog_orders_by_index_and_skips_non_rows() {
        let block = Block::new("clips info")
            .with_field("clip count", "3")
            .with_field("3", "c.mov 00:00:00:00 00:00:03:00")
            .with_field("1", "a.mov 00:00:00:00 00:00:01:00")
            .with_field("01", "ignored.mov 00:00:00:00 00:00:01:00")
            .with_field("2", "b.mov 00:00:00:00 00:00:02:00");

        let (clips, invalid) = parse_clip_catalog(SlotId::TWO, &Payload::Block(block), None).unwrap();
        assert!(invalid.is_empty());
        let names: Vec<_> = clips.iter().map(|c| c.filename.as_str()).collect();
        assert_eq!(names, vec!["a.mov", "b.mov", "c.mov"]);
        assert!(clips.iter().all(|c| c.slot_id == SlotId::TWO));
        assert_eq!(clips[2].length, 3000);
    }

    #[test]
    fn test_catalog_reports_bad_rows() {
        let block = Block::new("clips info")
            .with_field("1", "broken")
            .with_field("2", "ok.mov 00:00:00:00 00:00:01:00");
        let (clips, invalid) = parse_clip_catalog(SlotId::ONE, &Payload::Block(block), None).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_catalog_rejects_other_payloads() {
        assert!(matches!(
            parse_clip_catalog(SlotId::ONE, &Payload::Text("ok".into()), None),
            Err(ClientError::UnexpectedReply(_))
        ));
    }

    #[test]
    fn test_scheduler_coalesces_burst() {
        let mut scheduler = RefreshScheduler::new(Duration::from_millis(200));
        let t0 = Instant::now();

        assert!(scheduler.observe(SlotId::ONE, SlotStatus::Mounted, SlotStatus::Empty, t0));
        let t1 = t0 + Duration::from_millis(150);
        assert!(scheduler.observe(SlotId::ONE, SlotStatus::Empty, SlotStatus::Empty, t1));
        let t2 = t0 + Duration::from_millis(180);
        assert!(scheduler.observe(SlotId::ONE, SlotStatus::Mounted, SlotStatus::Empty, t2));

        // The first deadline has passed but the burst pushed it back
        assert!(scheduler.take_due(t0 + Duration::from_millis(250)).is_empty());
        assert_eq!(scheduler.next_deadline(), Some(t2 + Duration::from_millis(200)));

        let due = scheduler.take_due(t2 + Duration::from_millis(200));
        assert_eq!(due, vec![(SlotId::ONE, SlotStatus::Mounted)]);
        assert!(scheduler.take_due(t2 + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_scheduler_compares_against_pending_status() {
        let mut scheduler = RefreshScheduler::new(Duration::from_millis(200));
        let t0 = Instant::now();

        assert!(!scheduler.observe(SlotId::TWO, SlotStatus::Empty, SlotStatus::Empty, t0));
        assert!(scheduler.observe(SlotId::TWO, SlotStatus::Mounted, SlotStatus::Empty, t0));
        // Same as the pending status, so the deadline is not pushed back
        assert!(!scheduler.observe(SlotId::TWO, SlotStatus::Mounted, SlotStatus::Empty, t0 + Duration::from_millis(100)));

        let due = scheduler.take_due(t0 + Duration::from_millis(200));
        assert_eq!(due.len(), 1);

        // Refresh still running: the cache says empty, but mounted is expected
        assert!(!scheduler.observe(SlotId::TWO, SlotStatus::Mounted, SlotStatus::Empty, t0 + Duration::from_millis(300)));

        scheduler.committed(SlotId::TWO, SlotStatus::Mounted);
        assert!(!scheduler.observe(SlotId::TWO, SlotStatus::Mounted, SlotStatus::Mounted, t0 + Duration::from_millis(400)));
    }

    #[test]
    fn test_notifications_update_state() {
        let (mut cache, mut rx) = cache();
        let now = Instant::now();

        cache.on_notification(
            &ProtocolMessage::block(
                StatusCode::CONNECTION_INFO,
                Block::new("connection info")
                    .with_field("protocol version", "1.11")
                    .with_field("model", "Studio Deck"),
            ),
            now,
        );
        assert_eq!(
            cache.state.read().hardware_info().get("model").map(String::as_str),
            Some("Studio Deck")
        );

        cache.on_notification(
            &ProtocolMessage::block(
                StatusCode::TRANSPORT_NOTIFY,
                Block::new("transport info").with_field("status", "play"),
            ),
            now,
        );
        assert_eq!(cache.state.read().transport_status(), Some("play"));
        assert_eq!(rx.try_recv().unwrap(), DeckEvent::Transport("play".into()));
    }

    #[test]
    fn test_slot_notification_schedules_refresh() {
        let (mut cache, _rx) = cache();
        let now = Instant::now();

        cache.on_notification(&slot_notify("1", "empty"), now);
        assert_eq!(cache.next_deadline(), None);

        cache.on_notification(&slot_notify("1", "mounted"), now);
        assert_eq!(cache.next_deadline(), Some(now + Duration::from_millis(200)));

        // Out of range slot ids are ignored
        cache.on_notification(&slot_notify("4", "mounted"), now);
        assert_eq!(cache.take_due(now + Duration::from_millis(200)).len(), 1);
    }

    #[test]
    fn test_unknown_notifications_are_errors() {
        let (mut cache, mut rx) = cache();
        let now = Instant::now();

        cache.on_notification(
            &ProtocolMessage::block(StatusCode::SLOT_NOTIFY, Block::new("remote info")),
            now,
        );
        assert!(matches!(rx.try_recv().unwrap(), DeckEvent::Error(_)));

        cache.on_notification(
            &ProtocolMessage::text(StatusCode::new(510).unwrap(), "timecode info"),
            now,
        );
        assert!(matches!(rx.try_recv().unwrap(), DeckEvent::Error(_)));
    }

    #[test]
    fn test_commit_replaces_slot_and_flattens_in_order() {
        let (mut cache, _rx) = cache();
        let clip = |slot, index, name: &str| Clip {
            filename: name.to_string(),
            length: 0,
            start_time: "00:00:00:00".into(),
            index,
            slot_id: slot,
        };

        cache.commit_slot(SlotId::THREE, SlotStatus::Mounted, vec![clip(SlotId::THREE, 1, "c")]);
        cache.commit_slot(SlotId::ONE, SlotStatus::Mounted, vec![clip(SlotId::ONE, 1, "a"), clip(SlotId::ONE, 2, "b")]);

        let names: Vec<_> = cache.clips().into_iter().map(|c| c.filename).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(cache.state.read().find_clip("b").map(|c| c.index), Some(2));

        cache.commit_slot(SlotId::ONE, SlotStatus::Empty, Vec::new());
        assert_eq!(cache.clips().len(), 1);
        assert_eq!(cache.state.read().slot(SlotId::ONE).status, SlotStatus::Empty);
    }
}
