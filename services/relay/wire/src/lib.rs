//! Framing primitives for the stdio relay.
//!
//! This crate holds the small amount of "wire" knowledge the relay needs on
//! either side of the boundary:
//!
//! - **Input framing**: turning raw stdin chunks into outbound text messages,
//!   either one message per chunk or one message per reassembled line
//! - **Output encoding**: `<payload>\n`, one inbound message per line
//! - **Close codes**: the WebSocket close codes the relay issues
//! - **Log previews**: bounded, char-boundary safe truncation for log lines
//!
//! ## Output format
//!
//! ```text
//! +----------------------+----------------------------+
//! | payload              | raw message bytes, as-is   |
//! +----------------------+----------------------------+
//! | 0x0A                 | single newline terminator  |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod close;
pub mod error;
pub mod frame;
pub mod preview;

// Re-export main types
pub use close::{CloseCode, CLOSE_ABNORMAL, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_NO_STATUS};
pub use error::WireError;
pub use frame::{encode_output_line, InputFramer, InputFraming, DEFAULT_MAX_LINE_SIZE};
pub use preview::{preview, DEFAULT_PREVIEW_LEN};
