//! WebSocket transport for relay sessions.
//!
//! A [`Connector`] opens one connection and hands back its two halves. The
//! production connector wraps `tokio-tungstenite`; tests plug in their own.

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;
use url::Url;

use crate::error::TransportError;

/// Outbound half of a connection
pub type WsSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Inbound half of a connection
pub type WsSource = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Opens connections to the relay endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the connection handshake with `endpoint`
    async fn connect(&self, endpoint: &str) -> Result<(WsSink, WsSource), TransportError>;
}

/// `tokio-tungstenite` client connector
#[derive(Clone, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<(WsSink, WsSource), TransportError> {
        let (ws, response) = connect_async(endpoint).await?;
        debug!(
            "WebSocket handshake with {} completed (HTTP {})",
            endpoint,
            response.status()
        );
        let (sink, source) = ws.split();
        Ok((Box::pin(sink), Box::pin(source)))
    }
}

/// Build the endpoint URL for a host and port
pub fn endpoint_url(host: &str, port: u16) -> String {
    format!("ws://{}:{}", host, port)
}

/// Reject endpoints that cannot be dialed as a WebSocket
pub fn validate_endpoint(endpoint: &str) -> Result<(), TransportError> {
    let invalid = |reason: &str| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;

    match parsed.scheme() {
        "ws" => {}
        "wss" => return Err(invalid("TLS endpoints are not supported, use ws://")),
        other => return Err(invalid(&format!("scheme must be ws://, got {}://", other))),
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(invalid("missing host")),
    }

    if parsed.port_or_known_default().is_none() {
        return Err(invalid("missing port"));
    }
    Ok(())
}
