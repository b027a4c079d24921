//! Protocol error types

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid OpCode: {0}")]
    InvalidOpCode(u8),

    #[error("Header too short: expected {expected} bytes, got {got}")]
    HeaderTooShort { expected: usize, got: usize },

    #[error("Protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("Payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Payload length mismatch: expected {expected} bytes, got {got}")]
    PayloadLengthMismatch { expected: usize, got: usize },

    #[error("Unexpected frame {got:?} (expected {expected})")]
    UnexpectedFrame {
        expected: &'static str,
        got: crate::OpCode,
    },

    #[error("Call id mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: u64, got: u64 },

    #[error("Unknown property type '{0}'")]
    UnknownPropertyType(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl ProtocolError {
    /// True when the peer went away rather than sending something malformed.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
