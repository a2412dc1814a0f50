//! Binary frame protocol for the realtime dialogue channel.
//!
//! Every frame starts with a 4-byte-aligned header:
//! ```text
//! ┌─────────┬─────────────┬──────────┬─────────────┬───────────────┬──────────┐
//! │ version │ header size │ msg type │ msg flags   │ serialization │ compress │
//! │ 4 bits  │ 4 bits (×4) │ 4 bits   │ 4 bits      │ 4 bits        │ 4 bits   │
//! └─────────┴─────────────┴──────────┴─────────────┴───────────────┴──────────┘
//! ```
//! followed by zero padding up to `header size * 4` bytes and the optional
//! sequence, error code, event, session/connect ID and the length-prefixed
//! payload. All multi-byte integers are big endian.

pub mod codec;
pub mod compression;
pub mod events;
pub mod header;
pub mod message;
pub mod sequence;

pub use codec::FrameCodec;
pub use compression::Compression;
pub use header::{FrameHeader, ProtocolConfig, Serialization};
pub use message::{Message, MessageFlags, MessageKind};
pub use sequence::{contains_sequence, SequencePolicy};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {field} needs {needed} bytes, {available} remaining")]
    MalformedFrame {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unknown message type: {0:#06b}")]
    UnknownMessageType(u8),

    #[error("Invalid header size: {0} words")]
    InvalidHeaderSize(u8),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Unsupported compression: {0:#x}")]
    UnsupportedCompression(u8),

    #[error("Invalid UTF-8 in {field}")]
    InvalidString { field: &'static str },

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid protocol configuration: {0}")]
    InvalidConfig(String),
}
