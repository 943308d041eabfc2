//! Connection driver
//!
//! One task per [`crate::Deck`] owns the socket, the frame parser, the
//! sequencer and the writer side of the cache. Handles talk to it over an
//! mpsc channel of [`Request`]s, so none of that state is ever shared.
//!
//! Bootstrap and clip refreshes run as short-lived helper tasks that submit
//! their commands through the same channel as everyone else and hand results
//! back as requests. Results from a previous session are dropped.

use deck_core::{
    Clip, Command, FrameParser, Payload, SlotId, SlotStatus, StatusClass, SLOT_COUNT,
};
use deck_transport::{
    TcpReceiver, TcpSender, TcpTransport, TransportError, TransportEvent, TransportReceiver,
    TransportSender,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{parse_clip_catalog, DeviceCache, DeviceState};
use crate::config::DeckConfig;
use crate::error::{ClientError, Result};
use crate::event::{ConnectionState, DeckEvent, EventBus};
use crate::sequencer::{Action, PendingCommand, Sequencer, SequencerConfig};

/// Buffered requests between handles and the driver
const REQUEST_CHANNEL_SIZE: usize = 64;

pub(crate) enum Request {
    Command(PendingCommand),
    /// Store a slot's status and clips
    CommitSlot {
        /// Session the result was read in
        session: u64,
        slot: SlotId,
        status: SlotStatus,
        clips: Vec<Clip>,
        /// Publish a `Clips` event once stored
        announce: bool,
    },
    Bootstrapped {
        session: u64,
    },
    Close(oneshot::Sender<()>),
}

/// Sending side of the driver's request channel
#[derive(Clone)]
pub(crate) struct CommandHandle {
    tx: mpsc::Sender<Request>,
    session: Arc<AtomicU64>,
}

impl CommandHandle {
    /// Queue a command and wait for its outcome
    pub(crate) async fn send(&self, command: Command) -> Result<Payload> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Command(PendingCommand::new(command, reply)))
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Ask the driver to end the connection and wait until it has
    pub(crate) async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Request::Close(done)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Id of the current (or most recent) socket session
    pub(crate) fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Store a slot read in `session` outside the bootstrap or refresh tasks.
    /// Dropped if the connection has been replaced since.
    pub(crate) async fn store(
        &self,
        session: u64,
        slot: SlotId,
        status: SlotStatus,
        clips: Vec<Clip>,
    ) -> Result<()> {
        self.commit(session, slot, status, clips, true).await
    }

    async fn commit(
        &self,
        session: u64,
        slot: SlotId,
        status: SlotStatus,
        clips: Vec<Clip>,
        announce: bool,
    ) -> Result<()> {
        self.tx
            .send(Request::CommitSlot {
                session,
                slot,
                status,
                clips,
                announce,
            })
            .await
            .map_err(|_| ClientError::Closed)
    }

    async fn bootstrapped(&self, session: u64) -> Result<()> {
        self.tx
            .send(Request::Bootstrapped { session })
            .await
            .map_err(|_| ClientError::Closed)
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// `end()` was called, or every handle is gone
    Shutdown,
    /// The socket went away underneath us
    Lost,
    /// A command ran out of retries
    Unhealthy,
}

/// Outcome of opening a socket
enum Opening {
    Open(TcpSender, TcpReceiver),
    Failed(TransportError),
    /// Closed before the socket came up
    Stopped,
}

pub(crate) struct Driver {
    config: DeckConfig,
    requests: mpsc::Receiver<Request>,
    /// For helper tasks; weak so that dropping every handle stops the driver
    handle: mpsc::WeakSender<Request>,
    state_tx: watch::Sender<ConnectionState>,
    events: EventBus,
    cache: DeviceCache,
    sequencer: Sequencer,
    session: u64,
    /// `session`, readable from handles
    shared_session: Arc<AtomicU64>,
    /// Reconnects made since the last successful bootstrap
    attempt: u32,
    tasks: Vec<JoinHandle<()>>,
    close_waiters: Vec<oneshot::Sender<()>>,
}

impl Driver {
    /// Start a driver task for `config`
    pub(crate) fn spawn(
        config: DeckConfig,
        events: EventBus,
    ) -> (CommandHandle, watch::Receiver<ConnectionState>, Arc<RwLock<DeviceState>>) {
        let (tx, requests) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Initializing);
        let state = Arc::new(RwLock::new(DeviceState::default()));
        let shared_session = Arc::new(AtomicU64::new(0));

        let driver = Driver {
            cache: DeviceCache::new(state.clone(), config.refresh_debounce(), events.clone()),
            sequencer: Sequencer::new(SequencerConfig::from(&config)),
            config,
            requests,
            handle: tx.downgrade(),
            state_tx,
            events,
            session: 0,
            shared_session: shared_session.clone(),
            attempt: 0,
            tasks: Vec::new(),
            close_waiters: Vec::new(),
        };
        tokio::spawn(driver.run());

        (
            CommandHandle {
                tx,
                session: shared_session,
            },
            state_rx,
            state,
        )
    }

    async fn run(mut self) {
        loop {
            if self.attempt > 0 {
                let delay = self.config.reconnect.backoff(self.attempt);
                self.events.info(format!(
                    "Reconnecting to deck in {:?} (attempt {}/{})",
                    delay, self.attempt, self.config.reconnect.max_attempts
                ));
                if !self.wait_offline(delay).await {
                    break;
                }
            }

            self.set_state(ConnectionState::Connecting);
            let (sender, receiver) = match self.open().await {
                Opening::Open(sender, receiver) => (sender, receiver),
                Opening::Failed(e) => {
                    self.events.error(format!(
                        "Could not connect to deck at {}: {}",
                        self.config.address(),
                        e
                    ));
                    if self.attempt > 0 && self.retry_allowed() {
                        continue;
                    }
                    break;
                }
                Opening::Stopped => break,
            };

            match self.run_session(sender, receiver).await {
                SessionEnd::Shutdown | SessionEnd::Lost => break,
                SessionEnd::Unhealthy => {
                    if !self.retry_allowed() {
                        break;
                    }
                }
            }
        }

        self.finish();
    }

    fn can_reconnect(&self) -> bool {
        let policy = &self.config.reconnect;
        policy.enabled && self.attempt < policy.max_attempts
    }

    /// Count a reconnect attempt, if the policy has one left
    fn retry_allowed(&mut self) -> bool {
        if !self.config.reconnect.enabled {
            return false;
        }
        if !self.can_reconnect() {
            self.events.error(format!(
                "Giving up on deck after {} reconnect attempts",
                self.attempt
            ));
            return false;
        }
        self.attempt += 1;
        true
    }

    async fn open(&mut self) -> Opening {
        let addr = self.config.address();
        let transport = TcpTransport::with_config(self.config.tcp_config());
        let connect = transport.connect(&addr);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok((sender, receiver)) => Opening::Open(sender, receiver),
                        Err(e) => Opening::Failed(e),
                    };
                }
                request = self.requests.recv() => {
                    if !self.offline_request(request) {
                        return Opening::Stopped;
                    }
                }
            }
        }
    }

    /// Sit out a reconnect delay; false if the client was closed meanwhile
    async fn wait_offline(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                request = self.requests.recv() => {
                    if !self.offline_request(request) {
                        return false;
                    }
                }
            }
        }
    }

    /// Handle a request while there is no socket; false means stop
    fn offline_request(&mut self, request: Option<Request>) -> bool {
        match request {
            Some(Request::Command(pending)) => {
                pending.resolve(Err(ClientError::NotConnected));
                true
            }
            Some(Request::CommitSlot { .. }) | Some(Request::Bootstrapped { .. }) => true,
            Some(Request::Close(done)) => {
                self.close_waiters.push(done);
                false
            }
            None => false,
        }
    }

    async fn run_session(&mut self, sender: TcpSender, mut receiver: TcpReceiver) -> SessionEnd {
        self.session += 1;
        let session = self.session;
        self.shared_session.store(session, Ordering::Release);
        let mut parser = FrameParser::new();
        info!("Deck session {} started", session);

        self.spawn_task(|handle, events, fps| bootstrap(handle, events, session, fps));

        let end = loop {
            let deadline = earliest(self.sequencer.next_deadline(), self.cache.next_deadline());

            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Command(pending)) => {
                        let actions = self.sequencer.submit(pending, Instant::now());
                        if let Some(end) = self.apply(&sender, actions).await {
                            break end;
                        }
                    }
                    Some(Request::CommitSlot { session: from, slot, status, clips, announce }) => {
                        if from != session {
                            debug!("Dropping slot {} result from session {}", slot, from);
                            continue;
                        }
                        self.cache.commit_slot(slot, status, clips);
                        if announce {
                            self.events.emit(DeckEvent::Clips(self.cache.clips()));
                        }
                    }
                    Some(Request::Bootstrapped { session: from }) => {
                        if from == session {
                            self.attempt = 0;
                            self.set_state(ConnectionState::Connected);
                            self.events.emit(DeckEvent::Connected);
                        }
                    }
                    Some(Request::Close(done)) => {
                        self.close_waiters.push(done);
                        self.shutdown(&sender, &mut receiver).await;
                        break SessionEnd::Shutdown;
                    }
                    None => {
                        debug!("All deck handles dropped");
                        self.shutdown(&sender, &mut receiver).await;
                        break SessionEnd::Shutdown;
                    }
                },

                event = receiver.recv() => match event {
                    Some(TransportEvent::Data(data)) => {
                        parser.push(&data);
                        if let Some(end) = self.drain_parser(&sender, &mut parser).await {
                            break end;
                        }
                    }
                    Some(TransportEvent::Connected) => debug!("Deck socket open"),
                    Some(TransportEvent::Error(e)) => self.events.error(format!("Deck socket error: {}", e)),
                    Some(TransportEvent::Disconnected { reason }) => {
                        self.lost(reason.as_deref());
                        break SessionEnd::Lost;
                    }
                    None => {
                        self.lost(None);
                        break SessionEnd::Lost;
                    }
                },

                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    let actions = self.sequencer.on_tick(now);
                    if let Some(end) = self.apply(&sender, actions).await {
                        break end;
                    }
                    for (slot, status) in self.cache.take_due(now) {
                        debug!("Refreshing clips of slot {}", slot);
                        self.spawn_task(|handle, events, fps| refresh(handle, events, session, slot, status, fps));
                    }
                }
            }
        };

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.cache.reset_refreshes();
        info!("Deck session {} ended: {:?}", session, end);
        end
    }

    async fn drain_parser(&mut self, sender: &TcpSender, parser: &mut FrameParser) -> Option<SessionEnd> {
        while let Some(result) = parser.next_message() {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    self.events.error(format!("Bad response from deck: {}", e));
                    continue;
                }
            };
            debug!("Received: {}", message);

            match message.code.class() {
                StatusClass::Notification => self.cache.on_notification(&message, Instant::now()),
                StatusClass::Success | StatusClass::DeviceError => {
                    let actions = self.sequencer.on_message(message, Instant::now());
                    if let Some(end) = self.apply(sender, actions).await {
                        return Some(end);
                    }
                }
                StatusClass::Unknown => {
                    self.events
                        .error(format!("Unknown response from deck: {}", message));
                }
            }
        }
        None
    }

    async fn apply(&mut self, sender: &TcpSender, actions: Vec<Action>) -> Option<SessionEnd> {
        for action in actions {
            match action {
                Action::Write(data) => {
                    if let Err(e) = sender.send(data).await {
                        self.events
                            .error(format!("Deck socket cannot be written: {}", e));
                    }
                }
                Action::Info(message) => self.events.info(message),
                Action::Error(message) => self.events.error(message),
                Action::Unhealthy(command) => {
                    // Callers must not see the failure while still Connected
                    self.set_state(if self.can_reconnect() {
                        ConnectionState::Connecting
                    } else {
                        ConnectionState::Closed
                    });
                    self.events.error(format!(
                        "Deck did not answer '{}' after {} retries, dropping connection",
                        command, self.config.max_retries
                    ));
                    self.sequencer.give_up();
                    let _ = sender.close().await;
                    return Some(SessionEnd::Unhealthy);
                }
            }
        }
        None
    }

    /// Ask the deck to hang up, forcing the socket closed if it does not
    async fn shutdown(&mut self, sender: &TcpSender, receiver: &mut TcpReceiver) {
        info!("Closing deck connection");
        self.set_state(ConnectionState::Closed);
        let failed = self.sequencer.fail_all(|| ClientError::Closed);
        if failed > 0 {
            debug!("Rejected {} pending deck commands", failed);
        }

        if let Err(e) = sender.send(Command::Quit.encode()).await {
            debug!("Could not send quit: {}", e);
        }

        let hung_up = tokio::time::timeout(self.config.close_timeout(), async {
            loop {
                match receiver.recv().await {
                    Some(TransportEvent::Disconnected { .. }) | None => break,
                    Some(_) => continue,
                }
            }
        })
        .await;

        if hung_up.is_err() {
            self.events.error("Deck failed to close socket");
        }
        let _ = sender.close().await;
    }

    fn lost(&mut self, reason: Option<&str>) {
        self.events.error(format!(
            "Deck connection lost: {}",
            reason.unwrap_or("closed by deck")
        ));
        let failed = self.sequencer.fail_all(|| ClientError::ConnectionLost);
        if failed > 0 {
            warn!("{} deck commands lost with the connection", failed);
        }
    }

    fn finish(&mut self) {
        self.set_state(ConnectionState::Closed);
        self.sequencer.fail_all(|| ClientError::Closed);
        self.events.emit(DeckEvent::Closed);
        info!("Deck connection closed");
        for done in self.close_waiters.drain(..) {
            let _ = done.send(());
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            info!("Deck connection state: {:?}", state);
        }
        self.state_tx.send_replace(state);
    }

    fn spawn_task<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CommandHandle, EventBus, u32) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let Some(tx) = self.handle.upgrade() else {
            return;
        };
        self.tasks.retain(|task| !task.is_finished());
        let handle = CommandHandle {
            tx,
            session: self.shared_session.clone(),
        };
        let fut = task(handle, self.events.clone(), self.config.fps);
        self.tasks.push(tokio::spawn(fut));
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Enable notifications, read slot status, then load every slot's clips
async fn bootstrap(handle: CommandHandle, events: EventBus, session: u64, fps: u32) {
    if let Err(e) = handle
        .send(Command::Notify {
            slot: true,
            transport: true,
        })
        .await
    {
        events.error(format!("Could not enable deck notifications: {}", e));
    }

    let statuses = match slot_statuses(&handle).await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!("Slot status query failed, treating all slots as empty: {}", e);
            [SlotStatus::Empty; SLOT_COUNT]
        }
    };

    for slot in SlotId::ALL {
        let clips = fetch_clips(&handle, &events, slot, fps).await;
        if handle
            .commit(session, slot, statuses[slot.index()], clips, false)
            .await
            .is_err()
        {
            return;
        }
    }

    let _ = handle.bootstrapped(session).await;
}

/// Re-read one slot's clips after its status changed
async fn refresh(handle: CommandHandle, events: EventBus, session: u64, slot: SlotId, status: SlotStatus, fps: u32) {
    let clips = fetch_clips(&handle, &events, slot, fps).await;
    let _ = handle.commit(session, slot, status, clips, true).await;
}

async fn slot_statuses(handle: &CommandHandle) -> Result<[SlotStatus; SLOT_COUNT]> {
    let mut statuses = [SlotStatus::Empty; SLOT_COUNT];
    for slot in SlotId::ALL {
        handle.send(Command::SlotSelect(slot)).await?;
        let payload = handle.send(Command::SlotInfo).await?;
        let block = payload.as_block().ok_or_else(|| {
            ClientError::UnexpectedReply(format!("slot info reply '{}'", payload.summary()))
        })?;
        statuses[slot.index()] = SlotStatus::from_field(block.get("status"));
    }
    Ok(statuses)
}

/// Clips of one slot; any failure yields an empty list
async fn fetch_clips(handle: &CommandHandle, events: &EventBus, slot: SlotId, fps: u32) -> Vec<Clip> {
    match load_clips(handle, slot, fps).await {
        Ok((clips, invalid)) => {
            for e in invalid {
                events.error(format!("Invalid clip data from deck: {}", e));
            }
            clips
        }
        Err(e) => {
            warn!("Could not read clips of slot {}: {}", slot, e);
            Vec::new()
        }
    }
}

async fn load_clips(handle: &CommandHandle, slot: SlotId, fps: u32) -> Result<(Vec<Clip>, Vec<deck_core::Error>)> {
    handle.send(Command::SlotSelect(slot)).await?;
    let payload = handle.send(Command::ClipsGet).await?;
    parse_clip_catalog(slot, &payload, Some(fps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earliest() {
        let now = Instant::now();
        let later = now + Duration::from_millis(5);
        assert_eq!(earliest(None, None), None);
        assert_eq!(earliest(Some(later), None), Some(later));
        assert_eq!(earliest(None, Some(now)), Some(now));
        assert_eq!(earliest(Some(later), Some(now)), Some(now));
    }

    #[tokio::test]
    async fn test_closed_driver_rejects_commands() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = CommandHandle {
            tx,
            session: Arc::new(AtomicU64::new(0)),
        };
        assert!(matches!(handle.send(Command::Stop).await, Err(ClientError::Closed)));
        // Closing twice is harmless
        handle.close().await;
    }

    fn quick_config(address: &str) -> DeckConfig {
        DeckConfig {
            response_timeout_ms: 100,
            dispatch_delay_ms: 10,
            refresh_debounce_ms: 50,
            close_timeout_ms: 300,
            keepalive_secs: 0,
            max_retries: 1,
            reconnect: crate::config::ReconnectPolicy {
                enabled: true,
                initial_backoff_ms: 20,
                max_backoff_ms: 100,
                max_attempts: 3,
            },
            ..DeckConfig::new(address)
        }
    }

    #[tokio::test]
    async fn test_slot_result_from_replaced_session_is_dropped() {
        let mock = deck_test_utils::MockDeck::start().await;
        let (handle, mut state_rx, state) = Driver::spawn(quick_config(&mock.address()), EventBus::new(16));

        state_rx
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        let first = handle.session();
        assert_eq!(state.read().slot(SlotId::ONE).clips.len(), 2);

        // Force a reconnect
        mock.silence_command("stop", 2);
        assert!(matches!(
            handle.send(Command::Stop).await,
            Err(ClientError::RetriesExhausted { .. })
        ));
        state_rx
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(handle.session() > first);

        // A read begun before the reconnect lands afterwards
        handle
            .store(first, SlotId::ONE, SlotStatus::Empty, Vec::new())
            .await
            .unwrap();
        // Requests are handled in order, so the store has been seen
        handle.send(Command::Stop).await.unwrap();
        assert_eq!(state.read().slot(SlotId::ONE).status, SlotStatus::Mounted);
        assert_eq!(state.read().slot(SlotId::ONE).clips.len(), 2);

        handle
            .store(handle.session(), SlotId::ONE, SlotStatus::Empty, Vec::new())
            .await
            .unwrap();
        handle.send(Command::Stop).await.unwrap();
        assert!(state.read().slot(SlotId::ONE).clips.is_empty());

        handle.close().await;
    }
}
