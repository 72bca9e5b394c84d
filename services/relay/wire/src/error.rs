//! Wire error types.

use thiserror::Error;

/// Framing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    /// Buffered line grew past the configured limit without a terminator
    #[error("line exceeds {max} bytes without a newline (buffered {len})")]
    LineTooLong {
        /// Bytes buffered when the limit was hit
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Unknown framing mode name
    #[error("unknown framing mode: {0}")]
    UnknownFraming(String),
}
