use super::compression::Compression;
use super::ProtocolError;

pub const PROTOCOL_VERSION_1: u8 = 0b0001;
/// Header size in 4-byte words; one word holds the three fixed bytes plus one pad byte.
pub const HEADER_SIZE_4: u8 = 0b0001;

/// Payload serialization announced in the high nibble of the third header byte.
///
/// Payloads are opaque to the codec, so codes it has no name for are kept as
/// `Other` rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serialization {
    Raw,
    #[default]
    Json,
    Thrift,
    Custom,
    Other(u8),
}

impl Serialization {
    pub const fn code(self) -> u8 {
        match self {
            Serialization::Raw => 0x0,
            Serialization::Json => 0x1,
            Serialization::Thrift => 0x3,
            Serialization::Custom => 0xF,
            Serialization::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x0 => Serialization::Raw,
            0x1 => Serialization::Json,
            0x3 => Serialization::Thrift,
            0xF => Serialization::Custom,
            other => Serialization::Other(other),
        }
    }
}

/// Header-level settings applied to every encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub version: u8,
    pub header_size_words: u8,
    pub serialization: Serialization,
    pub compression: Compression,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION_1,
            header_size_words: HEADER_SIZE_4,
            serialization: Serialization::Json,
            compression: Compression::None,
        }
    }
}

impl ProtocolConfig {
    pub fn with_serialization(mut self, serialization: Serialization) -> Self {
        self.serialization = serialization;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.version > 0x0F {
            return Err(ProtocolError::InvalidConfig(format!(
                "version {} does not fit in 4 bits",
                self.version
            )));
        }
        if self.serialization.code() > 0x0F {
            return Err(ProtocolError::InvalidConfig(format!(
                "serialization {:#x} does not fit in 4 bits",
                self.serialization.code()
            )));
        }
        if self.header_size_words == 0 || self.header_size_words > 0x0F {
            return Err(ProtocolError::InvalidConfig(format!(
                "header size must be 1-15 words, got {}",
                self.header_size_words
            )));
        }
        Ok(())
    }

    pub fn header_len(&self) -> usize {
        self.header_size_words as usize * 4
    }
}

/// Header fields recovered while decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub header_size_words: u8,
    pub serialization: Serialization,
    pub compression: Compression,
}
