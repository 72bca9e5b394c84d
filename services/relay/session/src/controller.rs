//! Relay controller: the single owner of all relay state.
//!
//! The controller is a plain state machine. [`RelayController::handle_event`]
//! takes one [`RelayEvent`] and returns the [`Action`]s the runtime must
//! perform; it never performs I/O and never awaits. All state the relay has
//! (the active session and its connection state, the reconnect counter, the
//! input attachment) lives here and is only touched from that entry point.

use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use relay_wire::{encode_output_line, preview, CloseCode, InputFramer, CLOSE_INTERNAL_ERROR};

use crate::listener::{Attach, InputEvent, InputRoute, ListenerManager};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::session::{SessionConfig, SessionEvent};
use crate::shutdown::{ShutdownCoordinator, ShutdownDecision, ShutdownSignal};
use crate::state::{ConnectionState, SessionId, SessionStats};
use crate::{persist_debug, persist_info};

/// Everything the relay reacts to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// Something happened on a session
    Session {
        /// Session that reported the event
        session: SessionId,
        /// What happened
        event: SessionEvent,
    },
    /// Something happened on the input stream
    Input(InputEvent),
    /// The reconnect delay elapsed
    ReconnectDue,
    /// A termination signal arrived
    Signal(ShutdownSignal),
}

/// Side effects requested by the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Start a new session task; it replaces any previous session handle
    Connect {
        /// Identity of the new session
        session: SessionId,
        /// Endpoint to dial
        endpoint: String,
    },
    /// Send a text message on a session
    Send {
        /// Target session
        session: SessionId,
        /// Message text
        text: String,
    },
    /// Close a session
    Close {
        /// Target session
        session: SessionId,
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// Write bytes to the output stream
    Write(Bytes),
    /// Post [`RelayEvent::ReconnectDue`] after `delay`
    ScheduleReconnect {
        /// Delay before the event
        delay: Duration,
    },
    /// Terminate with the given status
    Exit(i32),
}

/// The active session handle
#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    state: ConnectionState,
    stats: SessionStats,
}

/// Relay state machine
#[derive(Debug)]
pub struct RelayController {
    config: SessionConfig,
    next_id: u64,
    active: Option<ActiveSession>,
    listeners: ListenerManager,
    reconnect: ReconnectPolicy,
    shutdown: ShutdownCoordinator,
    framer: InputFramer,
    exit_code: Option<i32>,
}

impl RelayController {
    /// Create a controller; nothing happens until [`RelayController::start`]
    pub fn new(config: SessionConfig) -> Self {
        let reconnect = ReconnectPolicy::new(config.max_reconnect_attempts, config.reconnect_delay);
        let framer = InputFramer::new(config.framing);
        Self {
            config,
            next_id: 0,
            active: None,
            listeners: ListenerManager::new(),
            reconnect,
            shutdown: ShutdownCoordinator::new(),
            framer,
            exit_code: None,
        }
    }

    /// Make the first connection attempt
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        info!(
            "Relay starting: endpoint={}, max_reconnect_attempts={}, reconnect_delay={:?}, framing={}",
            self.config.endpoint,
            self.config.max_reconnect_attempts,
            self.config.reconnect_delay,
            self.framer.mode()
        );
        self.connect(&mut actions);
        actions
    }

    /// Process one event
    pub fn handle_event(&mut self, event: RelayEvent) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(code) = self.exit_code {
            debug!("Ignoring {:?} after exit({})", event, code);
            return actions;
        }

        match event {
            RelayEvent::Session { session, event } => self.on_session_event(session, event, &mut actions),
            RelayEvent::Input(event) => self.on_input(event, &mut actions),
            RelayEvent::ReconnectDue => self.on_reconnect_due(&mut actions),
            RelayEvent::Signal(signal) => self.on_signal(signal, &mut actions),
        }
        actions
    }

    /// State of the active session, `Disconnected` if there is none
    pub fn state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map(|active| active.state)
            .unwrap_or_default()
    }

    /// Identity of the active session
    pub fn active_session(&self) -> Option<SessionId> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Counters of the active session
    pub fn stats(&self) -> Option<&SessionStats> {
        self.active.as_ref().map(|active| &active.stats)
    }

    /// Reconnect attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempts()
    }

    /// Whether input forwarding is attached
    pub fn listeners_attached(&self) -> bool {
        self.listeners.is_attached()
    }

    /// Exit status, once the controller has decided to terminate
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn connect(&mut self, actions: &mut Vec<Action>) {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        let fresh = ActiveSession {
            id,
            state: ConnectionState::Connecting,
            stats: SessionStats::default(),
        };
        if let Some(previous) = self.active.replace(fresh) {
            debug!("Session {} superseded by {}", previous.id, id);
        }
        info!("Connecting session {} to {}", id, self.config.endpoint);
        actions.push(Action::Connect {
            session: id,
            endpoint: self.config.endpoint.clone(),
        });
    }

    fn on_session_event(&mut self, session: SessionId, event: SessionEvent, actions: &mut Vec<Action>) {
        if self.active_session() != Some(session) {
            debug!("Ignoring {} event from superseded session {}", event.kind(), session);
            return;
        }

        match event {
            SessionEvent::Opened => self.on_open(session),
            SessionEvent::Message(payload) => self.on_message(session, payload, actions),
            SessionEvent::Closed { code, reason } => {
                if self.state() == ConnectionState::Disconnected {
                    debug!("Session {} already disconnected, ignoring close", session);
                    return;
                }
                info!(
                    "Session {} closed: code={}, reason={:?}",
                    session,
                    CloseCode(code),
                    reason
                );
                self.end_session(actions);
            }
            SessionEvent::Error { message, code } => {
                if self.state() == ConnectionState::Disconnected {
                    debug!("Session {} already disconnected, ignoring error: {}", session, message);
                    return;
                }
                error!(
                    "Session {} error: {} (code: {})",
                    session,
                    message,
                    code.as_deref().unwrap_or("none")
                );
                self.end_session(actions);
            }
        }
    }

    fn on_open(&mut self, session: SessionId) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.state != ConnectionState::Connecting {
            warn!("Session {} reported open while {}", session, active.state);
            return;
        }
        active.state = ConnectionState::Open;
        active.stats.opened_at = Some(std::time::Instant::now());

        let cleared = self.reconnect.record_success();
        info!(
            "Session {} open to {} (reconnect counter {} -> 0)",
            session, self.config.endpoint, cleared
        );

        match self.listeners.attach(session) {
            Attach::Attached => debug!("Forwarding input to session {}", session),
            Attach::AlreadyAttached => debug!("Input already forwarded to session {}", session),
            Attach::Rebound { stale } => debug!("Input moved from session {} to {}", stale, session),
        }
    }

    fn on_message(&mut self, session: SessionId, payload: Bytes, actions: &mut Vec<Action>) {
        if let Some(active) = self.active.as_mut() {
            active.stats.messages_in += 1;
        }
        persist_debug!(
            "ws -> stdout [{}] ({} bytes): {}",
            session,
            payload.len(),
            preview(&String::from_utf8_lossy(&payload), self.config.preview_len)
        );
        actions.push(Action::Write(encode_output_line(&payload)));
    }

    /// Close or error: the session is gone either way
    fn end_session(&mut self, actions: &mut Vec<Action>) {
        self.listeners.detach();
        self.framer.reset();

        if let Some(active) = self.active.as_mut() {
            active.state = ConnectionState::Disconnected;
            persist_info!(
                "Session {} stats: messages_in={}, messages_out={}, inputs_dropped={}, uptime={:?}",
                active.id,
                active.stats.messages_in,
                active.stats.messages_out,
                active.stats.inputs_dropped,
                active.stats.uptime()
            );
        }

        if self.shutdown.is_in_progress() {
            info!("Connection closed during shutdown");
            self.exit(0, actions);
        } else {
            self.schedule_reconnect(actions);
        }
    }

    fn schedule_reconnect(&mut self, actions: &mut Vec<Action>) {
        self.listeners.detach();

        match self.reconnect.on_disconnect() {
            ReconnectDecision::Retry { attempt, max, delay } => {
                info!(
                    "Reconnect attempt {}/{} to {} in {:?}",
                    attempt, max, self.config.endpoint, delay
                );
                actions.push(Action::ScheduleReconnect { delay });
            }
            ReconnectDecision::AlreadyScheduled => {
                debug!("Reconnect already scheduled");
            }
            ReconnectDecision::Exhausted { attempts } => {
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    self.config.endpoint, attempts
                );
                self.exit(1, actions);
            }
        }
    }

    fn on_reconnect_due(&mut self, actions: &mut Vec<Action>) {
        if !self.reconnect.on_timer_fired() {
            debug!("Reconnect timer fired with nothing scheduled");
            return;
        }
        if self.shutdown.is_in_progress() {
            debug!("Shutdown in progress, not reconnecting");
            return;
        }
        self.connect(actions);
    }

    fn on_input(&mut self, event: InputEvent, actions: &mut Vec<Action>) {
        match self.listeners.route(event) {
            InputRoute::Forward { session, chunk } => self.forward_input(session, &chunk, actions),
            InputRoute::Ended { session } => {
                info!("Input stream ended");
                if let Some(text) = self.framer.flush() {
                    self.send_text(session, text, actions);
                }
            }
            InputRoute::Failed { session, error } => {
                error!("Input stream error: {}", error);
                self.close(session, CLOSE_INTERNAL_ERROR, "stdin error", actions);
            }
            InputRoute::Dropped(InputEvent::Data(chunk)) => {
                if let Some(active) = self.active.as_mut() {
                    active.stats.inputs_dropped += 1;
                }
                warn!(
                    "Dropping {} input bytes: no open connection ({})",
                    chunk.len(),
                    self.state()
                );
                persist_debug!(
                    "dropped input: {}",
                    preview(&String::from_utf8_lossy(&chunk), self.config.preview_len)
                );
            }
            InputRoute::Dropped(InputEvent::End) => info!("Input stream ended while disconnected"),
            InputRoute::Dropped(InputEvent::Error(error)) => {
                warn!("Input stream error while disconnected: {}", error)
            }
        }
    }

    fn forward_input(&mut self, session: SessionId, chunk: &[u8], actions: &mut Vec<Action>) {
        if self.active_session() != Some(session) || self.state() != ConnectionState::Open {
            if let Some(active) = self.active.as_mut() {
                active.stats.inputs_dropped += 1;
            }
            warn!(
                "Dropping {} input bytes for session {}: connection is {}",
                chunk.len(),
                session,
                self.state()
            );
            return;
        }

        let mut messages = Vec::new();
        if let Err(e) = self.framer.push(chunk, &mut messages) {
            warn!("Input framing error: {}", e);
        }
        for text in messages {
            self.send_text(session, text, actions);
        }
    }

    fn send_text(&mut self, session: SessionId, text: String, actions: &mut Vec<Action>) {
        if let Some(active) = self.active.as_mut() {
            active.stats.messages_out += 1;
        }
        persist_debug!(
            "stdin -> ws [{}] ({} bytes): {}",
            session,
            text.len(),
            preview(&text, self.config.preview_len)
        );
        actions.push(Action::Send { session, text });
    }

    /// Graceful close of `session` if it is still connecting or open
    fn close(&mut self, session: SessionId, code: u16, reason: &str, actions: &mut Vec<Action>) {
        let Some(active) = self.active.as_mut().filter(|active| active.id == session) else {
            debug!("Close requested for superseded session {}", session);
            return;
        };
        if !active.state.is_connectable() {
            debug!("Session {} is {}, not closing again", session, active.state);
            return;
        }
        info!("Closing session {}: code={}, reason={:?}", session, CloseCode(code), reason);
        active.state = ConnectionState::Closing;
        // Input stays attached only while open
        self.listeners.detach();
        actions.push(Action::Close {
            session,
            code,
            reason: reason.to_string(),
        });
    }

    fn on_signal(&mut self, signal: ShutdownSignal, actions: &mut Vec<Action>) {
        info!("Received {}, shutting down", signal);
        match self.shutdown.begin(signal, self.state()) {
            ShutdownDecision::Close { code, reason } => {
                if let Some(session) = self.active_session() {
                    self.close(session, code, &reason, actions);
                }
            }
            ShutdownDecision::ExitNow => {
                info!("No connection to close");
                self.exit(0, actions);
            }
        }
    }

    fn exit(&mut self, code: i32, actions: &mut Vec<Action>) {
        self.exit_code = Some(code);
        actions.push(Action::Exit(code));
    }
}
