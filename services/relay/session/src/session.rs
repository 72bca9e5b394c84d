//! Per-connection session task.
//!
//! Each connection attempt runs [`run_session`] in its own task. The task
//! performs the handshake, then loops over inbound frames and commands from
//! the relay, reporting everything it observes as [`SessionEvent`]s tagged
//! with its [`SessionId`]. It never makes lifecycle decisions itself.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use relay_wire::{InputFraming, CLOSE_ABNORMAL, CLOSE_NO_STATUS, DEFAULT_PREVIEW_LEN};

use crate::controller::RelayEvent;
use crate::error::TransportError;
use crate::reconnect::{MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY};
use crate::state::SessionId;
use crate::transport::{endpoint_url, Connector};

/// Default port of the relay endpoint
pub const DEFAULT_PORT: u16 = 8765;

/// Default host of the relay endpoint
pub const DEFAULT_HOST: &str = "localhost";

/// Configuration for relay sessions
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8765`
    pub endpoint: String,
    /// Bound on consecutive reconnect attempts
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// How long to wait for the peer to answer a close frame
    pub close_timeout: Duration,
    /// Characters of message content kept in log previews
    pub preview_len: usize,
    /// How stdin chunks become messages
    pub framing: InputFraming,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoint_url(DEFAULT_HOST, DEFAULT_PORT),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: RECONNECT_DELAY,
            close_timeout: Duration::from_secs(5),
            preview_len: DEFAULT_PREVIEW_LEN,
            framing: InputFraming::Chunk,
        }
    }
}

/// Events emitted by sessions
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed
    Opened,
    /// Inbound text or binary message
    Message(Bytes),
    /// Connection closed, cleanly or not
    Closed {
        /// Close code (1005 when the frame had none, 1006 when there was no frame)
        code: u16,
        /// Close reason
        reason: String,
    },
    /// Transport failure
    Error {
        /// Error description
        message: String,
        /// Error code, when one is known
        code: Option<String>,
    },
}

impl SessionEvent {
    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Opened => "open",
            SessionEvent::Message(_) => "message",
            SessionEvent::Closed { .. } => "close",
            SessionEvent::Error { .. } => "error",
        }
    }
}

/// Commands from the relay to a session task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    /// Send one text message
    Send(String),
    /// Start the close handshake
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Posts a session's events to the relay loop
struct Reporter {
    session: SessionId,
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl Reporter {
    fn report(&self, event: SessionEvent) {
        // The relay loop only goes away on exit
        let _ = self.events.send(RelayEvent::Session {
            session: self.session,
            event,
        });
    }

    fn error(&self, error: &TransportError) {
        self.report(SessionEvent::Error {
            message: error.to_string(),
            code: error.code(),
        });
    }
}

/// Run one session until its connection ends or its command channel is dropped
pub async fn run_session<C>(
    session: SessionId,
    connector: Arc<C>,
    endpoint: String,
    close_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<RelayEvent>,
) where
    C: Connector + ?Sized,
{
    let reporter = Reporter { session, events };

    let connect = connector.connect(&endpoint);
    tokio::pin!(connect);

    let (mut sink, mut source) = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(halves) => break halves,
                Err(e) => {
                    debug!("Session {} failed to connect to {}: {}", session, endpoint, e);
                    reporter.error(&e);
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Close { code, reason }) => {
                    info!("Session {} closed before the handshake completed", session);
                    reporter.report(SessionEvent::Closed { code, reason });
                    return;
                }
                Some(SessionCommand::Send(_)) => {
                    warn!("Session {} is not open yet, dropping outbound message", session);
                }
                None => {
                    debug!("Session {} superseded while connecting", session);
                    return;
                }
            },
        }
    };

    reporter.report(SessionEvent::Opened);

    // Close frame seen from the peer, or the one we sent
    let mut close_frame: Option<(u16, String)> = None;
    let mut close_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    reporter.report(SessionEvent::Message(Bytes::copy_from_slice(text.as_str().as_bytes())));
                }
                Some(Ok(Message::Binary(data))) => {
                    reporter.report(SessionEvent::Message(data));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                    trace!("Session {} control frame", session);
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    debug!("Session {} received close frame {} {:?}", session, code, reason);
                    close_frame = Some((code, reason));
                }
                Some(Err(e)) => {
                    let e = TransportError::from(e);
                    if e.is_closed() || close_deadline.is_some() {
                        debug!("Session {} stream ended: {}", session, e);
                        report_closed(&reporter, close_frame.take());
                    } else {
                        reporter.error(&e);
                    }
                    return;
                }
                None => {
                    report_closed(&reporter, close_frame.take());
                    return;
                }
            },

            command = commands.recv(), if close_deadline.is_none() => match command {
                Some(SessionCommand::Send(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        reporter.error(&TransportError::from(e));
                        return;
                    }
                }
                Some(SessionCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: reason.clone().into(),
                    };
                    close_frame = Some((code, reason));
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!("Session {} could not send close frame: {}", session, e);
                        report_closed(&reporter, close_frame.take());
                        return;
                    }
                    close_deadline = Some(Instant::now() + close_timeout);
                }
                None => {
                    debug!("Session {} handle dropped, closing connection", session);
                    let _ = sink.close().await;
                    return;
                }
            },

            _ = tokio::time::sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                warn!("Session {} close handshake timed out after {:?}", session, close_timeout);
                report_closed(&reporter, close_frame.take());
                return;
            }
        }
    }
}

fn report_closed(reporter: &Reporter, frame: Option<(u16, String)>) {
    let (code, reason) = frame.unwrap_or((CLOSE_ABNORMAL, String::new()));
    reporter.report(SessionEvent::Closed { code, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{WsSink, WsSource};
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use std::sync::Mutex;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite;

    /// Connector that hands out one in-memory connection
    struct Loopback {
        halves: Mutex<Option<(WsSink, WsSource)>>,
    }

    #[async_trait]
    impl Connector for Loopback {
        async fn connect(&self, _endpoint: &str) -> Result<(WsSink, WsSource), TransportError> {
            self.halves
                .lock()
                .unwrap()
                .take()
                .ok_or(TransportError::WebSocket(tungstenite::Error::ConnectionClosed))
        }
    }

    struct Peer {
        to_session: fmpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
        from_session: fmpsc::UnboundedReceiver<Message>,
    }

    fn loopback() -> (Arc<Loopback>, Peer) {
        let (to_session, source) = fmpsc::unbounded();
        let (sink, from_session) = fmpsc::unbounded::<Message>();
        let sink: WsSink = Box::pin(sink.sink_map_err(|_| tungstenite::Error::ConnectionClosed));
        let source: WsSource = Box::pin(source);
        let connector = Arc::new(Loopback {
            halves: Mutex::new(Some((sink, source))),
        });
        (connector, Peer { to_session, from_session })
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RelayEvent>) -> SessionEvent {
        match timeout(Duration::from_secs(30), rx.recv()).await.unwrap() {
            Some(RelayEvent::Session { event, .. }) => event,
            other => panic!("Expected session event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_reports_open_message_close() {
        let (connector, mut peer) = loopback();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_session(
            SessionId(1),
            connector,
            "ws://test".to_string(),
            Duration::from_secs(5),
            cmd_rx,
            event_tx,
        ));

        assert_eq!(next_event(&mut event_rx).await, SessionEvent::Opened);

        peer.to_session.unbounded_send(Ok(Message::text(r#"{"a":1}"#))).unwrap();
        assert_eq!(
            next_event(&mut event_rx).await,
            SessionEvent::Message(Bytes::from_static(br#"{"a":1}"#))
        );

        cmd_tx.send(SessionCommand::Send("hello".to_string())).unwrap();
        assert_eq!(peer.from_session.next().await, Some(Message::text("hello")));

        drop(peer.to_session);
        assert_eq!(
            next_event(&mut event_rx).await,
            SessionEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() }
        );
    }

    #[tokio::test]
    async fn test_session_connect_failure_reports_error() {
        let connector = Arc::new(Loopback { halves: Mutex::new(None) });
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_session(
            SessionId(1),
            connector,
            "ws://test".to_string(),
            Duration::from_secs(5),
            cmd_rx,
            event_tx,
        ));

        assert!(matches!(next_event(&mut event_rx).await, SessionEvent::Error { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_handshake_times_out() {
        let (connector, mut peer) = loopback();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_session(
            SessionId(1),
            connector,
            "ws://test".to_string(),
            Duration::from_secs(5),
            cmd_rx,
            event_tx,
        ));
        assert_eq!(next_event(&mut event_rx).await, SessionEvent::Opened);

        cmd_tx
            .send(SessionCommand::Close { code: 1000, reason: "bye".to_string() })
            .unwrap();
        match peer.from_session.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(u16::from(frame.code), 1000),
            other => panic!("Expected close frame, got {:?}", other),
        }

        // Peer never answers; the session reports the close itself
        let started = Instant::now();
        assert_eq!(
            next_event(&mut event_rx).await,
            SessionEvent::Closed { code: 1000, reason: "bye".to_string() }
        );
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
