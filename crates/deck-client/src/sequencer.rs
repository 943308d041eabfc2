//! Command sequencing
//!
//! The deck handles one command at a time and answers in order, so every
//! command goes through a single queue:
//!
//! - at most one command is in flight, waiting for a reply;
//! - up to `max_backlog` more wait behind it, first in first out;
//! - after each reply the next command is held back for `dispatch_delay`
//!   so a burst does not saturate the deck;
//! - a command with no reply within `response_timeout` is written again,
//!   and after `max_retries` resends the session is declared unhealthy.
//!
//! [`Sequencer`] is a plain state machine. It never touches the socket; it
//! returns [`Action`]s for the driver to carry out, and reports deadlines
//! for the driver to sleep on.

use bytes::Bytes;
use deck_core::{Command, Payload, ProtocolMessage};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DeckConfig;
use crate::error::{ClientError, Result};

/// Where a command's outcome goes
pub(crate) type ReplySender = oneshot::Sender<Result<Payload>>;

/// A command waiting for dispatch or for its reply
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub(crate) command: Command,
    pub(crate) retries: u32,
    reply: ReplySender,
}

impl PendingCommand {
    pub(crate) fn new(command: Command, reply: ReplySender) -> Self {
        Self {
            command,
            retries: 0,
            reply,
        }
    }

    pub(crate) fn resolve(self, result: Result<Payload>) {
        // The caller may have stopped waiting
        let _ = self.reply.send(result);
    }
}

/// Work the driver must do on the sequencer's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Write(Bytes),
    Info(String),
    Error(String),
    /// A command exhausted its retries; the connection needs replacing
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub(crate) struct SequencerConfig {
    pub response_timeout: Duration,
    pub dispatch_delay: Duration,
    pub max_backlog: usize,
    pub max_retries: u32,
}

impl From<&DeckConfig> for SequencerConfig {
    fn from(config: &DeckConfig) -> Self {
        Self {
            response_timeout: config.response_timeout(),
            dispatch_delay: config.dispatch_delay(),
            max_backlog: config.max_backlog,
            max_retries: config.max_retries,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    pending: PendingCommand,
    deadline: Instant,
}

#[derive(Debug)]
pub(crate) struct Sequencer {
    config: SequencerConfig,
    in_flight: Option<InFlight>,
    backlog: VecDeque<PendingCommand>,
    /// When the backlog head may be dispatched
    dispatch_at: Option<Instant>,
}

impl Sequencer {
    pub(crate) fn new(config: SequencerConfig) -> Self {
        Self {
            config,
            in_flight: None,
            backlog: VecDeque::new(),
            dispatch_at: None,
        }
    }

    /// Number of commands waiting behind the in-flight one
    pub(crate) fn queued(&self) -> usize {
        self.backlog.len()
    }

    /// Text of the command currently awaiting a reply
    pub(crate) fn in_flight(&self) -> Option<String> {
        self.in_flight.as_ref().map(|f| f.pending.command.text())
    }

    pub(crate) fn submit(&mut self, pending: PendingCommand, now: Instant) -> Vec<Action> {
        if self.in_flight.is_none() && self.backlog.is_empty() {
            return vec![self.start(pending, now)];
        }

        if self.backlog.len() >= self.config.max_backlog {
            let text = pending.command.text();
            pending.resolve(Err(ClientError::TooManyCommands));
            return vec![Action::Error(format!(
                "Too many simultaneous commands to deck, rejected '{}'",
                text
            ))];
        }

        let text = pending.command.text();
        self.backlog.push_back(pending);
        vec![Action::Info(format!(
            "Queued deck command '{}' ({} waiting)",
            text,
            self.backlog.len()
        ))]
    }

    /// Offer a reply to the waiting command
    pub(crate) fn on_message(&mut self, message: ProtocolMessage, now: Instant) -> Vec<Action> {
        let Some(in_flight) = self.in_flight.as_ref() else {
            if message.code.is_device_error() {
                return vec![Action::Error(format!(
                    "Unexpected deck error with no command waiting: {}",
                    message
                ))];
            }
            debug!("Ignoring reply with no command waiting: {}", message);
            return Vec::new();
        };

        let accepted = in_flight
            .pending
            .command
            .accepted_codes()
            .contains(&message.code);

        if accepted {
            self.finish(Ok(message.payload), now);
        } else if message.code.is_device_error() {
            let error = ClientError::device(message.code, message.payload.summary());
            self.finish(Err(error), now);
        } else {
            debug!(
                "Reply {} does not complete '{}'",
                message.code,
                in_flight.pending.command
            );
        }

        Vec::new()
    }

    /// Handle expired timers
    pub(crate) fn on_tick(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();

        if let Some(in_flight) = self.in_flight.as_mut() {
            if now >= in_flight.deadline {
                if in_flight.pending.retries >= self.config.max_retries {
                    // Left in flight until the driver calls give_up
                    actions.push(Action::Unhealthy(in_flight.pending.command.text()));
                    return actions;
                }

                in_flight.pending.retries += 1;
                in_flight.deadline = now + self.config.response_timeout;
                warn!(
                    "No reply to '{}' within {:?}, resending",
                    in_flight.pending.command, self.config.response_timeout
                );
                actions.push(Action::Info(format!(
                    "Deck command retry #{}: {}",
                    in_flight.pending.retries, in_flight.pending.command
                )));
                actions.push(Action::Write(in_flight.pending.command.encode()));
            }
        }

        if self.in_flight.is_none() {
            if let Some(at) = self.dispatch_at {
                if now >= at {
                    self.dispatch_at = None;
                    if let Some(next) = self.backlog.pop_front() {
                        actions.push(self.start(next, now));
                    }
                }
            }
        }

        actions
    }

    /// Earliest instant at which [`Sequencer::on_tick`] has work
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match &self.in_flight {
            Some(in_flight) => Some(in_flight.deadline),
            None => self.dispatch_at,
        }
    }

    /// Reject the in-flight command and the whole backlog
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> ClientError) -> usize {
        let mut failed = 0;
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.pending.resolve(Err(error()));
            failed += 1;
        }
        for pending in self.backlog.drain(..) {
            pending.resolve(Err(error()));
            failed += 1;
        }
        self.dispatch_at = None;
        failed
    }

    /// Fail the command that ran out of retries, then everything queued
    /// behind it
    pub(crate) fn give_up(&mut self) -> usize {
        let mut failed = 0;
        if let Some(expired) = self.in_flight.take() {
            let command = expired.pending.command.text();
            expired
                .pending
                .resolve(Err(ClientError::RetriesExhausted { command }));
            failed += 1;
        }
        failed + self.fail_all(|| ClientError::ConnectionLost)
    }

    fn start(&mut self, pending: PendingCommand, now: Instant) -> Action {
        debug!("Sending deck command: {}", pending.command);
        let data = pending.command.encode();
        self.in_flight = Some(InFlight {
            pending,
            deadline: now + self.config.response_timeout,
        });
        Action::Write(data)
    }

    fn finish(&mut self, result: Result<Payload>, now: Instant) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.pending.resolve(result);
        }
        if !self.backlog.is_empty() {
            self.dispatch_at = Some(now + self.config.dispatch_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::{SlotId, StatusCode};
    use tokio::sync::oneshot::error::TryRecvError;

    fn config() -> SequencerConfig {
        SequencerConfig {
            response_timeout: Duration::from_millis(500),
            dispatch_delay: Duration::from_millis(200),
            max_backlog: 5,
            max_retries: 5,
        }
    }

    fn pending(command: Command) -> (PendingCommand, oneshot::Receiver<Result<Payload>>) {
        let (tx, rx) = oneshot::channel();
        (PendingCommand::new(command, tx), rx)
    }

    fn ok() -> ProtocolMessage {
        ProtocolMessage::text(StatusCode::OK, "ok")
    }

    fn writes(actions: &[Action]) -> Vec<Bytes> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_idle_submit_writes_immediately() {
        let mut seq = Sequencer::new(config());
        let now = Instant::now();
        let (cmd, mut rx) = pending(Command::Stop);

        let actions = seq.submit(cmd, now);
        assert_eq!(actions, vec![Action::Write(Bytes::from_static(b"stop\n"))]);
        assert_eq!(seq.in_flight().as_deref(), Some("stop"));
        assert_eq!(seq.next_deadline(), Some(now + Duration::from_millis(500)));

        seq.on_message(ok(), now);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Payload::Text("ok".into()));
        assert!(seq.in_flight().is_none());
        assert_eq!(seq.next_deadline(), None);
    }

    #[test]
    fn test_backlog_overflow_rejects_sixth() {
        let mut seq = Sequencer::new(config());
        let now = Instant::now();
        let (first, mut first_rx) = pending(Command::Stop);
        seq.submit(first, now);

        let mut queued = Vec::new();
        for i in 0..5 {
            let (cmd, rx) = pending(Command::PlayrangeSet { clip_id: i });
            let actions = seq.submit(cmd, now);
            assert!(matches!(actions[0], Action::Info(_)));
            queued.push(rx);
        }
        assert_eq!(seq.queued(), 5);

        let (sixth, mut sixth_rx) = pending(Command::GotoClipStart);
        let actions = seq.submit(sixth, now);
        assert!(matches!(actions[0], Action::Error(_)));
        assert!(matches!(sixth_rx.try_recv(), Ok(Err(ClientError::TooManyCommands))));

        // Everyone else is untouched
        assert_eq!(seq.queued(), 5);
        assert_eq!(seq.in_flight().as_deref(), Some("stop"));
        assert!(matches!(first_rx.try_recv(), Err(TryRecvError::Empty)));
        for rx in queued.iter_mut() {
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    #[test]
    fn test_next_command_waits_for_dispatch_delay() {
        let mut seq = Sequencer::new(config());
        let t0 = Instant::now();
        let (first, _rx1) = pending(Command::SlotSelect(SlotId::ONE));
        let (second, _rx2) = pending(Command::SlotInfo);
        seq.submit(first, t0);
        seq.submit(second, t0);

        let t1 = t0 + Duration::from_millis(10);
        seq.on_message(ok(), t1);
        assert!(seq.in_flight().is_none());
        assert_eq!(seq.next_deadline(), Some(t1 + Duration::from_millis(200)));

        // Too early
        assert!(seq.on_tick(t1 + Duration::from_millis(100)).is_empty());

        let actions = seq.on_tick(t1 + Duration::from_millis(200));
        assert_eq!(writes(&actions), vec![Bytes::from_static(b"slot info\n")]);
        assert_eq!(seq.in_flight().as_deref(), Some("slot info"));
    }

    #[test]
    fn test_submission_during_delay_keeps_order() {
        let mut seq = Sequencer::new(config());
        let t0 = Instant::now();
        let (a, _a) = pending(Command::custom("a", &[StatusCode::OK]));
        let (b, _b) = pending(Command::custom("b", &[StatusCode::OK]));
        let (c, _c) = pending(Command::custom("c", &[StatusCode::OK]));
        seq.submit(a, t0);
        seq.submit(b, t0);
        seq.on_message(ok(), t0);

        // Nothing in flight, but b is still waiting: c must queue behind it
        let actions = seq.submit(c, t0);
        assert!(writes(&actions).is_empty());

        let actions = seq.on_tick(t0 + Duration::from_millis(200));
        assert_eq!(writes(&actions), vec![Bytes::from_static(b"b\n")]);
    }

    #[test]
    fn test_device_error_rejects_and_advances() {
        let mut seq = Sequencer::new(config());
        let t0 = Instant::now();
        let (first, mut first_rx) = pending(Command::PlayrangeSet { clip_id: 99 });
        let (second, _rx) = pending(Command::Stop);
        seq.submit(first, t0);
        seq.submit(second, t0);

        seq.on_message(
            ProtocolMessage::text(StatusCode::new(109).unwrap(), "out of range"),
            t0,
        );
        match first_rx.try_recv() {
            Ok(Err(ClientError::Device { code, message })) => {
                assert_eq!(code.as_u16(), 109);
                assert_eq!(message, "out of range");
            }
            other => panic!("expected device error, got {:?}", other),
        }

        let actions = seq.on_tick(t0 + Duration::from_millis(200));
        assert_eq!(writes(&actions), vec![Bytes::from_static(b"stop\n")]);
    }

    #[test]
    fn test_unrelated_codes_do_not_complete() {
        let mut seq = Sequencer::new(config());
        let t0 = Instant::now();
        let (cmd, mut rx) = pending(Command::ClipsGet);
        seq.submit(cmd, t0);

        seq.on_message(ok(), t0);
        seq.on_message(
            ProtocolMessage::text(StatusCode::SLOT_NOTIFY, "slot info"),
            t0,
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(seq.in_flight().as_deref(), Some("clips get"));
    }

    #[test]
    fn test_timeout_resends_same_text_then_gives_up() {
        let mut seq = Sequencer::new(config());
        let mut now = Instant::now();
        let (cmd, mut rx) = pending(Command::SlotInfo);
        let (queued, mut queued_rx) = pending(Command::Stop);
        seq.submit(cmd, now);
        seq.submit(queued, now);

        for attempt in 1..=5 {
            now += Duration::from_millis(500);
            let actions = seq.on_tick(now);
            assert_eq!(
                actions[0],
                Action::Info(format!("Deck command retry #{}: slot info", attempt))
            );
            assert_eq!(writes(&actions), vec![Bytes::from_static(b"slot info\n")]);
        }

        now += Duration::from_millis(500);
        let actions = seq.on_tick(now);
        assert_eq!(actions, vec![Action::Unhealthy("slot info".into())]);
        // Nobody hears about it until the driver has updated its state
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(seq.give_up(), 2);
        assert!(matches!(
            rx.try_recv(),
            Ok(Err(ClientError::RetriesExhausted { ref command })) if command == "slot info"
        ));
        assert!(matches!(queued_rx.try_recv(), Ok(Err(ClientError::ConnectionLost))));
        assert_eq!(seq.next_deadline(), None);
    }

    #[test]
    fn test_reply_after_retry_resolves() {
        let mut seq = Sequencer::new(config());
        let t0 = Instant::now();
        let (cmd, mut rx) = pending(Command::Stop);
        seq.submit(cmd, t0);

        seq.on_tick(t0 + Duration::from_millis(500));
        seq.on_message(ok(), t0 + Duration::from_millis(600));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_device_error_with_nothing_waiting_is_reported() {
        let mut seq = Sequencer::new(config());
        let actions = seq.on_message(
            ProtocolMessage::text(StatusCode::new(105).unwrap(), "no disk"),
            Instant::now(),
        );
        assert!(matches!(actions[0], Action::Error(_)));
    }
}
