//! Protocol session
//!
//! Owns one child channel and its frame parser. Outbound commands are
//! length-prefixed; inbound stdout bytes are framed into messages and
//! republished as `SessionEvent`s together with diagnostics and closure.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::channel::{Channel, ChannelError, ChannelEvent, ProcessChannel};
use crate::protocol::{encode_command, FrameError, FrameParser, Message, Progress};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("AMPL has not been started")]
    NotStarted,

    #[error("AMPL is already started")]
    AlreadyStarted,

    #[error("AMPL has exited")]
    ChannelClosed,

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Session lifecycle: `NotStarted -> Started -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Started,
    Closed(Option<i32>),
}

/// Session events
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A complete protocol message
    Message(Message),
    /// AMPL is idle and waiting for a command; carries the prompt text
    PromptReady(String),
    /// Text from the child's stderr
    Diagnostic(String),
    /// The stdout stream could not be framed; buffered bytes were dropped
    ProtocolError(FrameError),
    /// No reply for this long since the last command
    Unresponsive(Duration),
    /// The child exited
    Closed(Option<i32>),
}

/// Anything that accepts commands for AMPL
pub trait CommandSink {
    fn send(&mut self, command: &str) -> Result<(), SessionError>;
}

/// A single AMPL session
pub struct ProtocolSession<C: Channel = ProcessChannel> {
    channel: C,
    parser: FrameParser,
    state: SessionState,
    events_rx: Option<Receiver<ChannelEvent>>,
    /// Events produced outside of `poll_events` (deferred frames)
    queued: Vec<SessionEvent>,
    /// Parser stopped at a final prompt with bytes still buffered
    deferred: bool,
    /// Stdin was half-closed by `stop`
    input_closed: bool,
    /// Time of the last send or inbound message while a reply is expected
    awaiting_since: Option<Instant>,
    idle_reported: bool,
}

impl<C: Channel> ProtocolSession<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            parser: FrameParser::new(),
            state: SessionState::NotStarted,
            events_rx: None,
            queued: Vec::new(),
            deferred: false,
            input_closed: false,
            awaiting_since: None,
            idle_reported: false,
        }
    }

    /// Launch the channel
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::NotStarted {
            return Err(SessionError::AlreadyStarted);
        }
        let rx = self.channel.start()?;
        self.events_rx = Some(rx);
        self.state = SessionState::Started;
        info!("Session started");
        Ok(())
    }

    #[allow(dead_code)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Started
    }

    /// Half-close the child's stdin. Further sends fail with `ChannelClosed`.
    pub fn stop(&mut self) {
        if self.state == SessionState::Started && !self.input_closed {
            info!("Stopping session");
            self.channel.close();
            self.input_closed = true;
            self.awaiting_since = None;
        }
    }

    /// Send a command to AMPL.
    ///
    /// Fire-and-forget: replies arrive later through `poll_events`.
    pub fn send(&mut self, command: &str) -> Result<(), SessionError> {
        match self.state {
            SessionState::NotStarted => return Err(SessionError::NotStarted),
            SessionState::Closed(_) => return Err(SessionError::ChannelClosed),
            SessionState::Started if self.input_closed => return Err(SessionError::ChannelClosed),
            SessionState::Started => {}
        }

        debug!("Sending command: {:?}", command);
        self.channel.write(&encode_command(command))?;
        self.awaiting_since = Some(Instant::now());
        self.idle_reported = false;

        // A new turn has begun; release frames held back behind the last prompt
        if self.deferred {
            let mut events = Vec::new();
            let result = self.parser.resume(|m| push_message(&mut events, m));
            self.note_replies(&events);
            self.after_parse(result, &mut events);
            self.queued.extend(events);
        }
        Ok(())
    }

    /// Drain every pending channel event without blocking.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut events = std::mem::take(&mut self.queued);

        loop {
            let received = match &self.events_rx {
                Some(rx) => rx.try_recv(),
                None => break,
            };

            match received {
                Ok(event) => self.handle_channel_event(event, &mut events),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Reader threads are gone without reporting an exit
                    self.events_rx = None;
                    if self.state == SessionState::Started {
                        self.handle_channel_event(ChannelEvent::Closed(None), &mut events);
                    }
                    break;
                }
            }
        }

        events
    }

    /// Report an unresponsive child once per command.
    pub fn check_idle(&mut self, timeout: Duration) -> Option<SessionEvent> {
        self.check_idle_at(Instant::now(), timeout)
    }

    fn check_idle_at(&mut self, now: Instant, timeout: Duration) -> Option<SessionEvent> {
        if self.idle_reported || !self.is_running() {
            return None;
        }
        let since = self.awaiting_since?;
        let elapsed = now.saturating_duration_since(since);
        if elapsed < timeout {
            return None;
        }
        warn!("No reply from AMPL for {:?}", elapsed);
        self.idle_reported = true;
        Some(SessionEvent::Unresponsive(elapsed))
    }

    fn handle_channel_event(&mut self, event: ChannelEvent, events: &mut Vec<SessionEvent>) {
        if let SessionState::Closed(_) = self.state {
            debug!("Ignoring event after close: {:?}", event);
            return;
        }

        match event {
            ChannelEvent::Stdout(data) => {
                let before = events.len();
                let result = self.parser.feed(&data, |m| push_message(events, m));
                self.note_replies(&events[before..]);
                self.after_parse(result, events);
            }
            ChannelEvent::Stderr(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                debug!("Diagnostic: {:?}", text);
                events.push(SessionEvent::Diagnostic(text));
            }
            ChannelEvent::Closed(code) => {
                info!("Session closed with code {:?}", code);
                self.state = SessionState::Closed(code);
                self.awaiting_since = None;
                events.push(SessionEvent::Closed(code));
            }
        }
    }

    /// Any prompt means AMPL is waiting on the user; other replies
    /// restart the idle clock.
    fn note_replies(&mut self, new_events: &[SessionEvent]) {
        if self.awaiting_since.is_none() {
            return;
        }
        let mut replied = false;
        for event in new_events {
            if let SessionEvent::Message(message) = event {
                if message.is_prompt() {
                    self.awaiting_since = None;
                    return;
                }
                replied = true;
            }
        }
        if replied {
            self.awaiting_since = Some(Instant::now());
        }
    }

    fn after_parse(&mut self, result: Result<Progress, FrameError>, events: &mut Vec<SessionEvent>) {
        match result {
            Ok(Progress::Prompted) => {
                self.awaiting_since = None;
                self.deferred = self.parser.pending() > 0;
            }
            Ok(Progress::Awaiting) => self.deferred = false,
            Err(e) => {
                warn!("Protocol error: {}", e);
                self.deferred = false;
                events.push(SessionEvent::ProtocolError(e));
            }
        }
    }
}

impl<C: Channel> CommandSink for ProtocolSession<C> {
    fn send(&mut self, command: &str) -> Result<(), SessionError> {
        ProtocolSession::send(self, command)
    }
}

fn push_message(events: &mut Vec<SessionEvent>, message: Message) {
    let prompt = message.is_final_prompt().then(|| message.body.clone());
    events.push(SessionEvent::Message(message));
    if let Some(body) = prompt {
        events.push(SessionEvent::PromptReady(body));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc::{self, Sender};

    use crate::core::channel::Result as ChannelResult;

    /// In-memory channel; the handle injects events and inspects writes
    struct MockChannel {
        rx: Option<Receiver<ChannelEvent>>,
        written: Rc<RefCell<Vec<u8>>>,
        closed: Rc<RefCell<bool>>,
    }

    struct MockHandle {
        tx: Sender<ChannelEvent>,
        written: Rc<RefCell<Vec<u8>>>,
        closed: Rc<RefCell<bool>>,
    }

    impl MockHandle {
        fn stdout(&self, data: &str) {
            self.tx.send(ChannelEvent::Stdout(data.as_bytes().to_vec())).unwrap();
        }

        fn written(&self) -> String {
            String::from_utf8(self.written.borrow().clone()).unwrap()
        }
    }

    fn mock_channel() -> (MockChannel, MockHandle) {
        let (tx, rx) = mpsc::channel();
        let written = Rc::new(RefCell::new(Vec::new()));
        let closed = Rc::new(RefCell::new(false));
        let channel = MockChannel {
            rx: Some(rx),
            written: Rc::clone(&written),
            closed: Rc::clone(&closed),
        };
        (channel, MockHandle { tx, written, closed })
    }

    impl Channel for MockChannel {
        fn start(&mut self) -> ChannelResult<Receiver<ChannelEvent>> {
            self.rx.take().ok_or(ChannelError::AlreadyStarted)
        }

        fn write(&mut self, data: &[u8]) -> ChannelResult<()> {
            self.written.borrow_mut().extend_from_slice(data);
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.borrow_mut() = true;
        }
    }

    fn frame(kind: &str, body: &str) -> String {
        format!("{} {}\n{}", body.len(), kind, body)
    }

    fn started() -> (ProtocolSession<MockChannel>, MockHandle) {
        let (channel, handle) = mock_channel();
        let mut session = ProtocolSession::new(channel);
        session.start().unwrap();
        (session, handle)
    }

    #[test]
    fn test_send_before_start() {
        let (channel, handle) = mock_channel();
        let mut session = ProtocolSession::new(channel);
        assert!(matches!(session.send("solve;"), Err(SessionError::NotStarted)));
        assert_eq!(handle.written(), "");
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_start_twice() {
        let (mut session, _handle) = started();
        assert!(matches!(session.start(), Err(SessionError::AlreadyStarted)));
    }

    #[test]
    fn test_send_writes_length_prefix() {
        let (mut session, handle) = started();
        session.send("option solver cplex;").unwrap();
        session.send("let x := 'é';").unwrap();
        assert_eq!(handle.written(), "20 option solver cplex;14 let x := 'é';");
    }

    #[test]
    fn test_stdout_becomes_messages() {
        let (mut session, handle) = started();
        handle.stdout(&frame("output", "x = 1\n"));
        handle.stdout(&frame("prompt1", "ampl: ")[..4]);
        handle.stdout(&frame("prompt1", "ampl: ")[4..]);

        assert_eq!(
            session.poll_events(),
            vec![
                SessionEvent::Message(Message::new("output", "x = 1\n")),
                SessionEvent::Message(Message::new("prompt1", "ampl: ")),
                SessionEvent::PromptReady("ampl: ".to_string()),
            ]
        );
        assert!(session.poll_events().is_empty());
    }

    #[test]
    fn test_stderr_is_not_framed() {
        let (mut session, handle) = started();
        handle
            .tx
            .send(ChannelEvent::Stderr(b"12 not a frame\n".to_vec()))
            .unwrap();

        assert_eq!(
            session.poll_events(),
            vec![SessionEvent::Diagnostic("12 not a frame\n".to_string())]
        );
    }

    #[test]
    fn test_malformed_stdout_reports_protocol_error() {
        let (mut session, handle) = started();
        handle.stdout("abc kind\nbody");
        handle.stdout(&frame("output", "recovered"));

        let events = session.poll_events();
        assert!(matches!(events[0], SessionEvent::ProtocolError(FrameError::Malformed { .. })));
        assert_eq!(
            events[1],
            SessionEvent::Message(Message::new("output", "recovered"))
        );
    }

    #[test]
    fn test_frames_after_prompt_wait_for_next_send() {
        let (mut session, handle) = started();
        let data = format!(
            "{}{}{}",
            frame("output", "one"),
            frame("prompt1", "ampl: "),
            frame("output", "two"),
        );
        handle.stdout(&data);

        let events = session.poll_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], SessionEvent::PromptReady("ampl: ".to_string()));
        assert!(session.poll_events().is_empty());

        session.send("display x;").unwrap();
        assert_eq!(
            session.poll_events(),
            vec![SessionEvent::Message(Message::new("output", "two"))]
        );
    }

    #[test]
    fn test_closed_then_send_fails_distinctly() {
        let (mut session, handle) = started();
        handle.tx.send(ChannelEvent::Closed(Some(0))).unwrap();
        handle.stdout(&frame("output", "late"));

        assert_eq!(session.poll_events(), vec![SessionEvent::Closed(Some(0))]);
        assert_eq!(session.state(), SessionState::Closed(Some(0)));
        assert!(matches!(session.send("solve;"), Err(SessionError::ChannelClosed)));
    }

    #[test]
    fn test_disconnect_without_exit_code() {
        let (mut session, handle) = started();
        drop(handle);
        assert_eq!(session.poll_events(), vec![SessionEvent::Closed(None)]);
        assert!(!session.is_running());
    }

    #[test]
    fn test_stop_half_closes() {
        let (mut session, handle) = started();
        session.stop();
        assert!(*handle.closed.borrow());
        assert!(matches!(session.send("solve;"), Err(SessionError::ChannelClosed)));
        // Still running until the child actually exits
        assert!(session.is_running());
    }

    #[test]
    fn test_idle_reported_once_per_command() {
        let (mut session, handle) = started();
        let timeout = Duration::from_secs(30);
        assert_eq!(session.check_idle(timeout), None);

        session.send("solve;").unwrap();
        let sent = session.awaiting_since.unwrap();
        assert_eq!(session.check_idle_at(sent + Duration::from_secs(1), timeout), None);

        let late = sent + Duration::from_secs(31);
        assert!(matches!(
            session.check_idle_at(late, timeout),
            Some(SessionEvent::Unresponsive(_))
        ));
        assert_eq!(session.check_idle_at(late, timeout), None);

        handle.stdout(&frame("prompt1", "ampl: "));
        session.poll_events();
        assert_eq!(session.awaiting_since, None);
    }

    #[test]
    fn test_continuation_prompt_is_not_idle() {
        let (mut session, handle) = started();
        let timeout = Duration::from_secs(60);
        session.send("display").unwrap();
        let sent = session.awaiting_since.unwrap();

        handle.stdout(&frame("prompt2", "ampl? "));
        session.poll_events();
        assert_eq!(session.awaiting_since, None);
        assert_eq!(session.check_idle_at(sent + Duration::from_secs(120), timeout), None);
    }

    #[test]
    fn test_output_restarts_idle_clock() {
        let (mut session, handle) = started();
        session.send("solve;").unwrap();
        let sent = session.awaiting_since.unwrap();

        handle.stdout(&frame("output", "Presolve...\n"));
        session.poll_events();
        let since = session.awaiting_since.unwrap();
        assert!(since >= sent);
    }
}
