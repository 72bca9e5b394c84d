//! Attachment of input-stream forwarding to the open session.
//!
//! The stdin reader runs for the whole process lifetime and posts every
//! chunk, end-of-stream and read error as an [`InputEvent`]. Whether those
//! events reach a session is decided here: while attached, data is forwarded
//! to the attached session, end-of-stream is informational and a read error
//! closes the session; while detached everything is dropped.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::state::SessionId;

/// One event from the input stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A chunk of bytes was read
    Data(Bytes),
    /// The stream reached end-of-file
    End,
    /// Reading failed
    Error(String),
}

/// Outcome of an attach call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attach {
    /// Handlers were installed
    Attached,
    /// Handlers were already installed for this session
    AlreadyAttached,
    /// Handlers were bound to a superseded session and now point at the new one
    Rebound {
        /// The session the handlers were previously bound to
        stale: SessionId,
    },
}

/// Where an input event goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputRoute {
    /// Forward data to the attached session
    Forward {
        /// Attached session
        session: SessionId,
        /// Raw chunk
        chunk: Bytes,
    },
    /// Input ended while attached
    Ended {
        /// Attached session
        session: SessionId,
    },
    /// Input failed while attached
    Failed {
        /// Attached session
        session: SessionId,
        /// Read error description
        error: String,
    },
    /// Nothing is attached; the event is dropped
    Dropped(InputEvent),
}

/// Tracks the single input-forwarding attachment
#[derive(Debug, Default)]
pub struct ListenerManager {
    attached: Option<SessionId>,
}

impl ListenerManager {
    /// Create a detached manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach forwarding to `session`; never installs a second set of handlers
    pub fn attach(&mut self, session: SessionId) -> Attach {
        match self.attached.replace(session) {
            None => {
                debug!("Input listeners attached to session {}", session);
                Attach::Attached
            }
            Some(current) if current == session => Attach::AlreadyAttached,
            Some(stale) => {
                warn!(
                    "Input listeners were still bound to session {}, rebinding to {}",
                    stale, session
                );
                Attach::Rebound { stale }
            }
        }
    }

    /// Detach forwarding; returns whether anything was attached
    pub fn detach(&mut self) -> bool {
        match self.attached.take() {
            Some(session) => {
                debug!("Input listeners detached from session {}", session);
                true
            }
            None => false,
        }
    }

    /// Whether forwarding is attached
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Dispatch an input event through the installed handlers
    pub fn route(&self, event: InputEvent) -> InputRoute {
        let Some(session) = self.attached else {
            return InputRoute::Dropped(event);
        };
        match event {
            InputEvent::Data(chunk) => InputRoute::Forward { session, chunk },
            InputEvent::End => InputRoute::Ended { session },
            InputEvent::Error(error) => InputRoute::Failed { session, error },
        }
    }
}
