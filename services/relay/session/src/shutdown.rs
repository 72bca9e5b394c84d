//! Signal-driven graceful shutdown.

use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use relay_wire::CLOSE_NORMAL;

use crate::state::ConnectionState;

/// Termination signals the relay honors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownSignal {
    /// Conventional signal name
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do about a received signal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownDecision {
    /// Close the active session and exit once its close event arrives
    Close {
        /// Close code to send
        code: u16,
        /// Close reason to send
        reason: String,
    },
    /// Nothing to close; exit now
    ExitNow,
}

/// Remembers whether a shutdown is underway
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested_by: Option<ShutdownSignal>,
}

impl ShutdownCoordinator {
    /// Create an idle coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide how to shut down given the active session's state
    pub fn begin(&mut self, signal: ShutdownSignal, state: ConnectionState) -> ShutdownDecision {
        if let Some(first) = self.requested_by {
            debug!("{} received while shutdown for {} is in progress", signal, first);
        } else {
            self.requested_by = Some(signal);
        }

        if state.is_connectable() {
            ShutdownDecision::Close {
                code: CLOSE_NORMAL,
                reason: format!("shutting down due to {}", signal),
            }
        } else {
            ShutdownDecision::ExitNow
        }
    }

    /// Whether a shutdown is underway
    pub fn is_in_progress(&self) -> bool {
        self.requested_by.is_some()
    }
}

/// Forward SIGINT and SIGTERM into `tx` until the receiver is dropped
#[cfg(unix)]
pub fn spawn_signal_listener(tx: mpsc::Sender<ShutdownSignal>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigint.recv() => ShutdownSignal::Interrupt,
                Some(()) = sigterm.recv() => ShutdownSignal::Terminate,
                else => break,
            };
            if tx.send(received).await.is_err() {
                break;
            }
        }
    }))
}

/// Forward Ctrl-C into `tx` until the receiver is dropped
#[cfg(not(unix))]
pub fn spawn_signal_listener(tx: mpsc::Sender<ShutdownSignal>) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(ShutdownSignal::Interrupt).await.is_err() {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_session_is_closed_normally() {
        let mut coordinator = ShutdownCoordinator::new();
        let decision = coordinator.begin(ShutdownSignal::Interrupt, ConnectionState::Open);
        assert_eq!(
            decision,
            ShutdownDecision::Close {
                code: 1000,
                reason: "shutting down due to SIGINT".to_string(),
            }
        );
        assert!(coordinator.is_in_progress());
    }

    #[test]
    fn test_no_session_exits_now() {
        let mut coordinator = ShutdownCoordinator::new();
        assert_eq!(
            coordinator.begin(ShutdownSignal::Terminate, ConnectionState::Disconnected),
            ShutdownDecision::ExitNow
        );
        assert_eq!(
            coordinator.begin(ShutdownSignal::Interrupt, ConnectionState::Closing),
            ShutdownDecision::ExitNow
        );
        assert!(coordinator.is_in_progress());
    }
}
