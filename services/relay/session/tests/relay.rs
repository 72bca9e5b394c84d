//! End-to-end relay behavior over an in-memory WebSocket and stdio pair.

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use relay_session::{
    Connector, Relay, SessionConfig, ShutdownSignal, TransportError, WsSink, WsSource,
};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

/// The server side of one accepted connection
struct Peer {
    to_relay: fmpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
    from_relay: fmpsc::UnboundedReceiver<Message>,
}

impl Peer {
    fn send_text(&self, text: &str) {
        self.to_relay.unbounded_send(Ok(Message::text(text))).unwrap();
    }

    async fn next(&mut self) -> Message {
        timeout(Duration::from_secs(30), self.from_relay.next())
            .await
            .expect("timed out waiting for the relay")
            .expect("relay dropped the connection")
    }

    /// Answer a close frame the way a server would, then hang up
    fn finish_close(self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        let _ = self.to_relay.unbounded_send(Ok(Message::Close(Some(frame))));
    }
}

enum Outcome {
    Refuse,
    Accept,
}

/// Connector that follows a script, then refuses forever
struct Scripted {
    script: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl Scripted {
    fn new(script: Vec<Outcome>) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            attempts: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peer_rx)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for Scripted {
    async fn connect(&self, endpoint: &str) -> Result<(WsSink, WsSource), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.to_string());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Outcome::Accept) => {
                let (to_relay, source) = fmpsc::unbounded();
                let (sink, from_relay) = fmpsc::unbounded::<Message>();
                let sink: WsSink =
                    Box::pin(sink.sink_map_err(|_| tungstenite::Error::ConnectionClosed));
                let source: WsSource = Box::pin(source);
                let _ = self.peers.send(Peer { to_relay, from_relay });
                Ok((sink, source))
            }
            Some(Outcome::Refuse) | None => Err(TransportError::from(tungstenite::Error::Io(
                io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            ))),
        }
    }
}

/// Input that stays silent until triggered, then fails
struct FailingInput {
    trigger: oneshot::Receiver<()>,
}

impl AsyncRead for FailingInput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match Pin::new(&mut self.get_mut().trigger).poll(cx) {
            Poll::Ready(_) => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin gone"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        endpoint: "ws://localhost:8765".to_string(),
        ..SessionConfig::default()
    }
}

async fn read_line(stdout: &mut tokio::io::DuplexStream) -> Vec<u8> {
    let mut line = Vec::new();
    loop {
        let byte = timeout(Duration::from_secs(30), stdout.read_u8())
            .await
            .expect("timed out waiting for output")
            .expect("output closed");
        line.push(byte);
        if byte == b'\n' {
            return line;
        }
    }
}

#[tokio::test]
async fn test_relays_both_directions_and_shuts_down_cleanly() {
    let (connector, mut peers) = Scripted::new(vec![Outcome::Accept]);
    let (mut stdin, stdin_reader) = tokio::io::duplex(1024);
    let (stdout_writer, mut stdout) = tokio::io::duplex(1024);
    let (signal_tx, signal_rx) = mpsc::channel(1);

    let relay = Relay::with_shared_connector(config(), connector.clone());
    let task = tokio::spawn(relay.run(stdin_reader, stdout_writer, signal_rx));

    let mut peer = peers.recv().await.unwrap();

    // Remote to stdout, verbatim plus newline
    peer.send_text(r#"{"a":1}"#);
    assert_eq!(read_line(&mut stdout).await, b"{\"a\":1}\n");

    // The open event was processed before that message, so input is attached
    stdin.write_all(b"{\"method\":\"ping\"}\n").await.unwrap();
    assert_eq!(peer.next().await, Message::text(r#"{"method":"ping"}"#));

    signal_tx.send(ShutdownSignal::Terminate).await.unwrap();
    match peer.next().await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1000);
            assert_eq!(frame.reason.as_str(), "shutting down due to SIGTERM");
        }
        other => panic!("Expected close frame, got {:?}", other),
    }
    peer.finish_close(1000, "bye");

    assert_eq!(timeout(Duration::from_secs(30), task).await.unwrap().unwrap(), 0);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(
        connector.endpoints.lock().unwrap().as_slice(),
        ["ws://localhost:8765".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts_with_status_one() {
    let (connector, _peers) = Scripted::new(Vec::new());
    let (_stdin, stdin_reader) = tokio::io::duplex(64);
    let (stdout_writer, _stdout) = tokio::io::duplex(64);
    let (_signal_tx, signal_rx) = mpsc::channel(1);

    let started = Instant::now();
    let status = Relay::with_shared_connector(config(), connector.clone())
        .run(stdin_reader, stdout_writer, signal_rx)
        .await;

    assert_eq!(status, 1);
    // The initial attempt plus ten scheduled retries, never more
    assert_eq!(connector.attempts(), 11);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(50), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(55), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_drop_and_resets_budget() {
    // Connect, drop, nine refusals, connect again, drop, ten refusals: exit
    let mut script = vec![Outcome::Accept];
    script.extend((0..9).map(|_| Outcome::Refuse));
    script.push(Outcome::Accept);
    let (connector, mut peers) = Scripted::new(script);
    let (_stdin, stdin_reader) = tokio::io::duplex(64);
    let (stdout_writer, _stdout) = tokio::io::duplex(64);
    let (_signal_tx, signal_rx) = mpsc::channel(1);

    let task = tokio::spawn(
        Relay::with_shared_connector(config(), connector.clone()).run(
            stdin_reader,
            stdout_writer,
            signal_rx,
        ),
    );

    let first = peers.recv().await.unwrap();
    drop(first);

    let started = Instant::now();
    let second = peers.recv().await.unwrap();
    // Nine refused retries plus the successful tenth, five seconds apart
    assert!(started.elapsed() >= Duration::from_secs(50));
    assert_eq!(connector.attempts(), 11);
    drop(second);

    assert_eq!(task.await.unwrap(), 1);
    assert_eq!(connector.attempts(), 21);
}

#[tokio::test]
async fn test_stdin_failure_closes_with_internal_error() {
    let (connector, mut peers) = Scripted::new(vec![Outcome::Accept]);
    let (fail_tx, fail_rx) = oneshot::channel();
    let (stdout_writer, mut stdout) = tokio::io::duplex(1024);
    let (signal_tx, signal_rx) = mpsc::channel(1);

    let relay = Relay::with_shared_connector(config(), connector.clone());
    let task = tokio::spawn(relay.run(FailingInput { trigger: fail_rx }, stdout_writer, signal_rx));

    let mut peer = peers.recv().await.unwrap();
    peer.send_text("ready");
    assert_eq!(read_line(&mut stdout).await, b"ready\n");

    fail_tx.send(()).unwrap();
    match peer.next().await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1011);
            assert_eq!(frame.reason.as_str(), "stdin error");
        }
        other => panic!("Expected close frame, got {:?}", other),
    }

    // Shut down while the relay waits to reconnect
    peer.finish_close(1011, "stdin error");
    tokio::time::sleep(Duration::from_millis(100)).await;
    signal_tx.send(ShutdownSignal::Interrupt).await.unwrap();
    assert_eq!(timeout(Duration::from_secs(30), task).await.unwrap().unwrap(), 0);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_binary_messages_are_written_raw() {
    let (connector, mut peers) = Scripted::new(vec![Outcome::Accept]);
    let (_stdin, stdin_reader) = tokio::io::duplex(64);
    let (stdout_writer, mut stdout) = tokio::io::duplex(1024);
    let (signal_tx, signal_rx) = mpsc::channel(1);

    let task = tokio::spawn(
        Relay::with_shared_connector(config(), connector).run(stdin_reader, stdout_writer, signal_rx),
    );

    let mut peer = peers.recv().await.unwrap();
    peer.to_relay
        .send(Ok(Message::binary(b"raw bytes".to_vec())))
        .await
        .unwrap();
    assert_eq!(read_line(&mut stdout).await, b"raw bytes\n");

    signal_tx.send(ShutdownSignal::Interrupt).await.unwrap();
    assert!(matches!(peer.next().await, Message::Close(Some(_))));
    peer.finish_close(1000, "");
    assert_eq!(timeout(Duration::from_secs(30), task).await.unwrap().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_default_settings_dial_port_8765() {
    let (connector, _peers) = Scripted::new(Vec::new());
    let (_stdin, stdin_reader) = tokio::io::duplex(64);
    let (stdout_writer, _stdout) = tokio::io::duplex(64);
    let (signal_tx, signal_rx) = mpsc::channel(1);

    let task = tokio::spawn(
        Relay::with_shared_connector(SessionConfig::default(), connector.clone()).run(
            stdin_reader,
            stdout_writer,
            signal_rx,
        ),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    signal_tx.send(ShutdownSignal::Terminate).await.unwrap();
    assert_eq!(task.await.unwrap(), 0);

    assert_eq!(connector.attempts(), 1);
    assert_eq!(
        connector.endpoints.lock().unwrap().as_slice(),
        ["ws://localhost:8765".to_string()]
    );
}
