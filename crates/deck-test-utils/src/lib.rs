//! Common test helpers and utilities for deck tests
//!
//! This crate provides:
//! - [`MockDeck`], a scripted TCP server that speaks the deck protocol
//! - Condition-based waiting (no hardcoded sleeps)
//! - Event collection for subscription testing

use bytes::Bytes;
use deck_client::{DeckBuilder, DeckConfig, DeckEvent, ReconnectPolicy};
use deck_core::{ErrorCode, SlotId};
use deck_transport::{
    TcpReceiver, TcpSender, TcpServer, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async move { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for the next event matching `predicate`, skipping others
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<DeckEvent>,
    predicate: F,
    max_wait: Duration,
) -> Option<DeckEvent>
where
    F: Fn(&DeckEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) if predicate(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

/// Timing settings that keep tests fast
pub fn fast_config(address: &str) -> DeckConfig {
    DeckConfig {
        response_timeout_ms: 100,
        dispatch_delay_ms: 10,
        refresh_debounce_ms: 50,
        close_timeout_ms: 300,
        connect_timeout_ms: 1000,
        keepalive_secs: 0,
        reconnect: ReconnectPolicy {
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
            ..Default::default()
        },
        ..DeckConfig::new(address)
    }
}

/// Builder preconfigured with [`fast_config`]
pub fn fast_builder(address: &str) -> DeckBuilder {
    DeckBuilder::from_config(fast_config(address))
}

// ============================================================================
// Mock Deck
// ============================================================================

/// A clip served by the mock deck
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockClip {
    pub filename: String,
    pub start: String,
    pub length: String,
}

impl MockClip {
    pub fn new(filename: &str, length: &str) -> Self {
        Self {
            filename: filename.to_string(),
            start: "00:00:00:00".to_string(),
            length: length.to_string(),
        }
    }
}

/// Contents of one mock slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockSlot {
    pub mounted: bool,
    pub clips: Vec<MockClip>,
}

impl MockSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn mounted(clips: Vec<MockClip>) -> Self {
        Self {
            mounted: true,
            clips,
        }
    }
}

/// What the mock deck holds and how it misbehaves
#[derive(Debug, Clone)]
pub struct MockScript {
    pub model: String,
    pub slots: [MockSlot; 3],
    /// Command text answered with this error code instead
    pub failures: HashMap<String, u16>,
    /// Command text ignored this many more times
    pub silences: HashMap<String, u32>,
    /// Keep the socket open when asked to quit
    pub ignore_quit: bool,
}

impl Default for MockScript {
    /// Slot 1 with two clips, slot 2 empty, slot 3 with one clip
    fn default() -> Self {
        Self {
            model: "Mock Deck Studio".to_string(),
            slots: [
                MockSlot::mounted(vec![
                    MockClip::new("Intro Take 1.mov", "00:00:10:00"),
                    MockClip::new("outro.mov", "00:01:00:30"),
                ]),
                MockSlot::empty(),
                MockSlot::mounted(vec![MockClip::new("loop.mov", "00:00:05:00")]),
            ],
            failures: HashMap::new(),
            silences: HashMap::new(),
            ignore_quit: false,
        }
    }
}

struct Shared {
    script: Mutex<MockScript>,
    received: Mutex<Vec<String>>,
    command_count: AtomicU32,
    connections: AtomicU32,
    current: Mutex<Option<TcpSender>>,
    activity: Notify,
}

/// Scripted deck server on a random local port.
///
/// Answers commands the way a deck does, records every command line it
/// receives, and can be told to fail, ignore or push notifications. Only
/// the most recent connection receives pushed data.
pub struct MockDeck {
    port: u16,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl MockDeck {
    /// Start with the default script
    pub async fn start() -> Self {
        Self::start_with(MockScript::default()).await
    }

    pub async fn start_with(script: MockScript) -> Self {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let shared = Arc::new(Shared {
            script: Mutex::new(script),
            received: Mutex::new(Vec::new()),
            command_count: AtomicU32::new(0),
            connections: AtomicU32::new(0),
            current: Mutex::new(None),
            activity: Notify::new(),
        });

        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            while let Ok((sender, receiver, peer)) = server.accept().await {
                debug!("Mock deck accepted {}", peer);
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                *accept_shared.current.lock() = Some(sender.clone());
                tokio::spawn(serve_connection(accept_shared.clone(), sender, receiver));
            }
        });

        Self {
            port,
            shared,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `127.0.0.1:<port>`
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Number of connections accepted so far
    pub fn connections(&self) -> u32 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Every command line received, in order
    pub fn received(&self) -> Vec<String> {
        self.shared.received.lock().clone()
    }

    /// How many times this exact command line arrived
    pub fn count(&self, command: &str) -> usize {
        self.shared
            .received
            .lock()
            .iter()
            .filter(|line| line.as_str() == command)
            .count()
    }

    /// Forget the commands received so far
    pub fn clear_received(&self) {
        self.shared.received.lock().clear();
    }

    /// Wait until `command` has arrived at least `times` times
    pub async fn wait_for_command(&self, command: &str, times: usize, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.shared.activity.notified();
            if self.count(command) >= times {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    /// Wait until no command has arrived for `quiet`
    pub async fn wait_idle(&self, quiet: Duration, max_wait: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < max_wait {
            let before = self.shared.command_count.load(Ordering::SeqCst);
            tokio::time::sleep(quiet).await;
            if self.shared.command_count.load(Ordering::SeqCst) == before {
                return true;
            }
        }
        false
    }

    /// Answer `command` with a device error from now on
    pub fn fail_command(&self, command: &str, code: u16) {
        self.shared
            .script
            .lock()
            .failures
            .insert(command.to_string(), code);
    }

    /// Stop failing `command`
    pub fn clear_failure(&self, command: &str) {
        self.shared.script.lock().failures.remove(command);
    }

    /// Ignore the next `times` arrivals of `command`
    pub fn silence_command(&self, command: &str, times: u32) {
        self.shared
            .script
            .lock()
            .silences
            .insert(command.to_string(), times);
    }

    /// Replace a slot's contents (no notification is sent)
    pub fn set_slot(&self, slot: SlotId, contents: MockSlot) {
        self.shared.script.lock().slots[slot.index()] = contents;
    }

    pub fn set_ignore_quit(&self, ignore: bool) {
        self.shared.script.lock().ignore_quit = ignore;
    }

    /// Write raw protocol text to the current connection
    pub async fn push(&self, raw: &str) {
        let sender = self.shared.current.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(Bytes::from(raw.to_string())).await;
        }
    }

    /// Send a `502 slot info` notification
    pub async fn notify_slot(&self, slot: SlotId, status: &str) {
        self.push(&format!(
            "502 slot info:\r\nslot id: {}\r\nstatus: {}\r\n\r\n",
            slot, status
        ))
        .await;
    }

    /// Send a `508 transport info` notification
    pub async fn notify_transport(&self, status: &str) {
        self.push(&format!("508 transport info:\r\nstatus: {}\r\n\r\n", status))
            .await;
    }

    /// Close the current connection from the deck side
    pub async fn drop_connection(&self) {
        let sender = self.shared.current.lock().take();
        if let Some(sender) = sender {
            let _ = sender.close().await;
        }
    }

    /// Stop accepting connections (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for MockDeck {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_connection(shared: Arc<Shared>, sender: TcpSender, mut receiver: TcpReceiver) {
    let banner = {
        let script = shared.script.lock();
        format!(
            "500 connection info:\r\nprotocol version: 1.11\r\nmodel: {}\r\n\r\n",
            script.model
        )
    };
    let _ = sender.send(Bytes::from(banner)).await;

    let mut selected = SlotId::ONE;
    let mut pending = String::new();

    while let Some(event) = receiver.recv().await {
        let data = match event {
            TransportEvent::Data(data) => data,
            TransportEvent::Disconnected { .. } => break,
            _ => continue,
        };
        pending.push_str(&String::from_utf8_lossy(&data));

        while let Some(end) = pending.find('\n') {
            let line: String = pending.drain(..=end).collect();
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if line.is_empty() {
                continue;
            }

            shared.received.lock().push(line.clone());
            shared.command_count.fetch_add(1, Ordering::SeqCst);
            shared.activity.notify_waiters();

            match respond(&shared, &line, &mut selected) {
                Reply::Send(text) => {
                    let _ = sender.send(Bytes::from(text)).await;
                }
                Reply::Silent => {}
                Reply::Hangup => {
                    let _ = sender.close().await;
                    return;
                }
            }
        }
    }
}

enum Reply {
    Send(String),
    Silent,
    Hangup,
}

fn respond(shared: &Shared, line: &str, selected: &mut SlotId) -> Reply {
    let mut script = shared.script.lock();

    if let Some(remaining) = script.silences.get_mut(line) {
        if *remaining > 0 {
            *remaining -= 1;
            return Reply::Silent;
        }
    }

    if let Some(code) = script.failures.get(line) {
        let text = ErrorCode::from_u16(*code)
            .map(|c| c.description())
            .unwrap_or("error");
        return Reply::Send(format!("{} {}\r\n", code, text));
    }

    if line == "quit" {
        return if script.ignore_quit {
            Reply::Silent
        } else {
            Reply::Hangup
        };
    }

    if let Some(id) = line.strip_prefix("slot select: slot id: ") {
        return match id.parse::<SlotId>() {
            Ok(slot) => {
                *selected = slot;
                Reply::Send("200 ok\r\n".to_string())
            }
            Err(_) => Reply::Send("102 invalid value\r\n".to_string()),
        };
    }

    let slot = &script.slots[selected.index()];
    match line {
        "slot info" => Reply::Send(format!(
            "202 slot info:\r\nslot id: {}\r\nstatus: {}\r\n\r\n",
            selected,
            if slot.mounted { "mounted" } else { "empty" }
        )),
        "clips get" => {
            let mut reply = format!("205 clips info:\r\nclip count: {}\r\n", slot.clips.len());
            for (i, clip) in slot.clips.iter().enumerate() {
                reply.push_str(&format!(
                    "{}: {} {} {}\r\n",
                    i + 1,
                    clip.filename,
                    clip.start,
                    clip.length
                ));
            }
            reply.push_str("\r\n");
            Reply::Send(reply)
        }
        _ if line.starts_with("notify:")
            || line.starts_with("play")
            || line.starts_with("goto:")
            || line == "stop" =>
        {
            Reply::Send("200 ok\r\n".to_string())
        }
        _ => Reply::Send("100 syntax error\r\n".to_string()),
    }
}

// ============================================================================
// Event Collector
// ============================================================================

/// Collects every event from a subscription in the background
#[derive(Clone)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<DeckEvent>>>,
    count: Arc<AtomicU32>,
}

impl EventCollector {
    pub fn spawn(mut rx: broadcast::Receiver<DeckEvent>) -> Self {
        let collector = Self {
            events: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicU32::new(0)),
        };
        let events = collector.events.clone();
        let count = collector.count.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        events.lock().push(event);
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        collector
    }

    pub fn events(&self) -> Vec<DeckEvent> {
        self.events.lock().clone()
    }

    /// Number of collected events matching `predicate`
    pub fn count_matching<F: Fn(&DeckEvent) -> bool>(&self, predicate: F) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Wait until `n` events matching `predicate` have been collected
    pub async fn wait_for_matching<F>(&self, n: usize, predicate: F, max_wait: Duration) -> bool
    where
        F: Fn(&DeckEvent) -> bool,
    {
        let predicate = &predicate;
        wait_for(
            || async move { self.count_matching(predicate) >= n },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }
}
