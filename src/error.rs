use std::net::SocketAddr;
use thiserror::Error;

/// Everything that can be wrong with the bytes of a single packet, datagram or fragment. The
///  offending input is dropped, but the session it arrived on stays usable. On the sending
///  side, a packet that has no valid encoding is rejected with the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedPacket {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("empty input")]
    Empty,
    #[error("offline magic mismatch")]
    BadMagic,
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: u64 },
    #[error("invalid UTF-8 in string field")]
    InvalidString,
    #[error("string of {0} bytes does not fit its u16 length prefix")]
    StringTooLong(usize),
}

impl MalformedPacket {
    pub fn invalid(field: &'static str, value: impl Into<u64>) -> MalformedPacket {
        MalformedPacket::InvalidField { field, value: value.into() }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] MalformedPacket),
    #[error("invalid datagram header flags {0:#04x}")]
    InvalidHeader(u8),
    #[error("session with {0} timed out")]
    SessionTimeout(SocketAddr),
    #[error("session with {0} is closed")]
    SessionClosed(SocketAddr),
    #[error("socket failure: {0}")]
    SocketFailure(#[from] std::io::Error),
}
