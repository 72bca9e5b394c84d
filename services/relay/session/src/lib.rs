//! WebSocket session lifecycle for the stdio relay.
//!
//! This crate owns everything between "an endpoint string" and "bytes on
//! stdout": the session task that drives one WebSocket connection, the
//! controller state machine that decides what happens on open, message,
//! close, error, input and signals, and the runtime loop that ties them to
//! real I/O.
//!
//! ## Features
//!
//! - **Session Task**: one task per connection attempt, reporting events
//! - **Listener Attachment**: input forwarding attached only while open
//! - **Bounded Reconnect**: fixed delay, fixed number of attempts, then exit 1
//! - **Graceful Shutdown**: SIGINT/SIGTERM close the socket with 1000, exit 0
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_session::{spawn_signal_listener, Relay, SessionConfig, WsConnector};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> std::io::Result<()> {
//! let config = SessionConfig {
//!     endpoint: "ws://localhost:8765".to_string(),
//!     ..SessionConfig::default()
//! };
//!
//! let (signal_tx, signal_rx) = mpsc::channel(4);
//! spawn_signal_listener(signal_tx)?;
//!
//! let status = Relay::new(config, WsConnector::new())
//!     .run(tokio::io::stdin(), tokio::io::stdout(), signal_rx)
//!     .await;
//! std::process::exit(status);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod error;
pub mod listener;
pub mod reconnect;
pub mod runtime;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod transport;

/// Log target for events that go to the log file only, never to stderr
pub const PERSIST_TARGET: &str = "relay_persist";

/// Debug event written to the log file only
#[macro_export]
macro_rules! persist_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "relay_persist", $($arg)*)
    };
}

/// Info event written to the log file only
#[macro_export]
macro_rules! persist_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "relay_persist", $($arg)*)
    };
}

// Re-export main types
pub use controller::{Action, RelayController, RelayEvent};
pub use error::TransportError;
pub use listener::{Attach, InputEvent, InputRoute, ListenerManager};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY};
pub use runtime::Relay;
pub use session::{
    run_session, SessionCommand, SessionConfig, SessionEvent, DEFAULT_HOST, DEFAULT_PORT,
};
pub use shutdown::{spawn_signal_listener, ShutdownCoordinator, ShutdownDecision, ShutdownSignal};
pub use state::{ConnectionState, SessionId, SessionStats};
pub use transport::{endpoint_url, validate_endpoint, Connector, WsConnector, WsSink, WsSource};
