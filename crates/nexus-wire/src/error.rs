//! Error types for nexus-wire.

use std::io;
use thiserror::Error;

/// The main error type for framing and connection operations.
#[derive(Error, Debug)]
pub enum WireError {
    /// An I/O error occurred on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configured packet size cannot carry any payload.
    #[error("invalid packet size: {0} (must be at least 1 byte)")]
    InvalidPacketSize(usize),

    /// The outgoing text contains a NUL byte, which is reserved for padding.
    #[error("message contains a NUL byte at offset {0}")]
    EmbeddedNul(usize),

    /// The peer went away in the middle of a message.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The connection was torn down locally while a read was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// No live stream is available for sending or receiving.
    #[error("not connected")]
    NotConnected,

    /// The connection manager is stopping.
    #[error("connection stopped")]
    Stopped,
}

impl WireError {
    /// Returns true if this error means the peer is gone and the caller
    /// should reconnect before trying again.
    pub fn is_disconnect(&self) -> bool {
        match self {
            WireError::ConnectionLost(_) | WireError::ConnectionClosed | WireError::NotConnected => {
                true
            }
            WireError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// A specialized result type for nexus-wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
