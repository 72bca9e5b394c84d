//! WebSocket close codes issued by the relay.

use std::fmt;

/// Normal closure, used for signal-driven shutdown
pub const CLOSE_NORMAL: u16 = 1000;

/// Close frame carried no status code
pub const CLOSE_NO_STATUS: u16 = 1005;

/// No close frame was received before the connection went away
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Internal error, used when the input stream fails
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Close code as seen by the relay
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Short registry name for a code, for log lines
    pub fn name(&self) -> &'static str {
        match self.0 {
            1000 => "normal",
            1001 => "going away",
            1002 => "protocol error",
            1003 => "unsupported data",
            CLOSE_NO_STATUS => "no status",
            CLOSE_ABNORMAL => "abnormal",
            1007 => "invalid payload",
            1008 => "policy violation",
            1009 => "message too big",
            1010 => "mandatory extension",
            CLOSE_INTERNAL_ERROR => "internal error",
            1012 => "service restart",
            1013 => "try again later",
            _ => "other",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}
