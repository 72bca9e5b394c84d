//! The relay loop.
//!
//! [`Relay::run`] drains a single event channel and feeds every event to the
//! [`RelayController`], then carries out the returned actions. Stdin reads,
//! stdout writes, session I/O and reconnect timers each run in their own task
//! and only talk to the loop by posting events, so controller state is only
//! ever touched from one place.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::{Action, RelayController, RelayEvent};
use crate::listener::InputEvent;
use crate::session::{run_session, SessionCommand, SessionConfig};
use crate::shutdown::ShutdownSignal;
use crate::state::SessionId;
use crate::transport::Connector;

/// Bytes requested from the input per read
const INPUT_CHUNK_SIZE: usize = 64 * 1024;

/// How long queued output may take to drain at exit
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Stdin/stdout to WebSocket relay
pub struct Relay<C: Connector> {
    controller: RelayController,
    connector: Arc<C>,
    close_timeout: Duration,
    /// Command channel of the active session task
    active: Option<(SessionId, mpsc::UnboundedSender<SessionCommand>)>,
}

impl<C: Connector> Relay<C> {
    /// Create a relay that dials through `connector`
    pub fn new(config: SessionConfig, connector: C) -> Self {
        Self::with_shared_connector(config, Arc::new(connector))
    }

    /// Create a relay around an already shared connector
    pub fn with_shared_connector(config: SessionConfig, connector: Arc<C>) -> Self {
        let close_timeout = config.close_timeout;
        Self {
            controller: RelayController::new(config),
            connector,
            close_timeout,
            active: None,
        }
    }

    /// Run until the controller decides to exit; returns the exit status
    pub async fn run<R, W>(
        mut self,
        input: R,
        output: W,
        mut signals: mpsc::Receiver<ShutdownSignal>,
    ) -> i32
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RelayEvent>();
        let input_task = tokio::spawn(pump_input(input, event_tx.clone()));
        let (output_tx, writer) = spawn_output_writer(output);

        let mut actions = self.controller.start();
        let code = 'relay: loop {
            for action in actions.drain(..) {
                if let Some(code) = self.execute(action, &event_tx, &output_tx) {
                    break 'relay code;
                }
            }

            let event = tokio::select! {
                Some(event) = event_rx.recv() => event,
                Some(signal) = signals.recv() => RelayEvent::Signal(signal),
                else => {
                    error!("All relay event sources closed");
                    break 'relay 1;
                }
            };
            actions = self.controller.handle_event(event);
        };

        input_task.abort();
        // Dropping the handle ends any session task still running
        self.active = None;

        drop(output_tx);
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, writer).await.is_err() {
            warn!("Output did not drain within {:?}", OUTPUT_DRAIN_TIMEOUT);
        }

        info!("Relay stopped with status {}", code);
        code
    }

    fn execute(
        &mut self,
        action: Action,
        events: &mpsc::UnboundedSender<RelayEvent>,
        output: &mpsc::UnboundedSender<Bytes>,
    ) -> Option<i32> {
        match action {
            Action::Connect { session, endpoint } => {
                let (command_tx, command_rx) = mpsc::unbounded_channel();
                if let Some((previous, _)) = self.active.replace((session, command_tx)) {
                    debug!("Released handle of session {}", previous);
                }
                tokio::spawn(run_session(
                    session,
                    self.connector.clone(),
                    endpoint,
                    self.close_timeout,
                    command_rx,
                    events.clone(),
                ));
            }
            Action::Send { session, text } => self.command(session, SessionCommand::Send(text)),
            Action::Close {
                session,
                code,
                reason,
            } => self.command(session, SessionCommand::Close { code, reason }),
            Action::Write(line) => {
                if output.send(line).is_err() {
                    warn!("Output writer stopped, dropping message");
                }
            }
            Action::ScheduleReconnect { delay } => {
                let events = events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(RelayEvent::ReconnectDue);
                });
            }
            Action::Exit(code) => return Some(code),
        }
        None
    }

    fn command(&self, session: SessionId, command: SessionCommand) {
        match &self.active {
            Some((active, tx)) if *active == session => {
                if tx.send(command).is_err() {
                    warn!("Session {} task has ended, command dropped", session);
                }
            }
            _ => debug!("No task for session {}, command dropped", session),
        }
    }
}

/// Read the input for the life of the process, posting every chunk
async fn pump_input<R>(mut input: R, events: mpsc::UnboundedSender<RelayEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(INPUT_CHUNK_SIZE);
    loop {
        buf.reserve(INPUT_CHUNK_SIZE);
        let event = match input.read_buf(&mut buf).await {
            Ok(0) => InputEvent::End,
            Ok(_) => InputEvent::Data(buf.split().freeze()),
            Err(e) => InputEvent::Error(e.to_string()),
        };
        let last = !matches!(event, InputEvent::Data(_));
        if events.send(RelayEvent::Input(event)).is_err() || last {
            break;
        }
    }
}

/// Fire-and-forget output: lines queue here and are written in order
fn spawn_output_writer<W>(mut output: W) -> (mpsc::UnboundedSender<Bytes>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let handle = tokio::spawn(async move {
        let mut failures: HashMap<std::io::ErrorKind, u64> = HashMap::new();
        while let Some(line) = rx.recv().await {
            let result = match output.write_all(&line).await {
                Ok(()) => output.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let count = failures.entry(e.kind()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    error!("Failed to write to output: {}", e);
                }
            }
        }
        if !failures.is_empty() {
            warn!("Output write failures: {:?}", failures);
        }
    });
    (tx, handle)
}
