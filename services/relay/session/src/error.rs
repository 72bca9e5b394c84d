//! Transport error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by a WebSocket connection
#[derive(Error, Debug)]
pub enum TransportError {
    /// Handshake, I/O or protocol failure from the WebSocket stack
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Endpoint is not a usable WebSocket URL
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The offending endpoint
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },
}

impl TransportError {
    /// Short machine-readable code for log lines, when one exists
    pub fn code(&self) -> Option<String> {
        match self {
            TransportError::WebSocket(tungstenite::Error::Io(e)) => Some(format!("{:?}", e.kind())),
            TransportError::WebSocket(tungstenite::Error::Http(response)) => {
                Some(format!("HTTP {}", response.status().as_u16()))
            }
            TransportError::WebSocket(tungstenite::Error::Url(_)) => Some("URL".to_string()),
            TransportError::WebSocket(tungstenite::Error::Protocol(_)) => Some("PROTOCOL".to_string()),
            TransportError::WebSocket(_) => None,
            TransportError::InvalidEndpoint { .. } => Some("INVALID_ENDPOINT".to_string()),
        }
    }

    /// Whether the error only reports that the connection is already gone
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TransportError::WebSocket(
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_code() {
        let err = TransportError::from(tungstenite::Error::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert_eq!(err.code().as_deref(), Some("ConnectionRefused"));
        assert!(!err.is_closed());
    }

    #[test]
    fn test_closed_errors() {
        assert!(TransportError::from(tungstenite::Error::ConnectionClosed).is_closed());
        assert!(TransportError::from(tungstenite::Error::AlreadyClosed).is_closed());
        assert_eq!(TransportError::from(tungstenite::Error::ConnectionClosed).code(), None);
    }
}
