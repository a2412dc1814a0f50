use thiserror::Error;

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::protocol::ProtocolError;
use crate::session::SessionState;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, DialogError>;

#[derive(Error, Debug)]
pub enum DialogError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Protocol violation during {action}: expected event {expected}, {detail}")]
    ProtocolViolation {
        action: &'static str,
        expected: i32,
        detail: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server reported error {code}: {}", String::from_utf8_lossy(.payload))]
    ServerReported { code: u32, payload: Vec<u8> },

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DialogError {
    /// The inbound frame stream can no longer be trusted, so no further
    /// control frames should be exchanged on this connection.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            DialogError::Protocol(_) | DialogError::ProtocolViolation { .. }
        )
    }
}
