//! Payload compression selected by the low nibble of the third header byte.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use super::ProtocolError;

/// Largest payload a gzip frame may expand to.
pub const MAX_DECOMPRESSED_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0x0,
    Gzip = 0x1,
}

impl Compression {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0x0 => Ok(Compression::None),
            0x1 => Ok(Compression::Gzip),
            _ => Err(ProtocolError::UnsupportedCompression(code)),
        }
    }

    /// Apply the compression transform to an outgoing payload.
    pub fn compress(self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Compression::None => Ok(payload.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(payload)
                    .map_err(|e| ProtocolError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| ProtocolError::Compression(e.to_string()))
            }
        }
    }

    /// Reverse the compression transform on an incoming payload.
    pub fn decompress(self, payload: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        self.decompress_limited(payload, MAX_DECOMPRESSED_LEN)
    }

    /// Like [`Compression::decompress`], failing once the output exceeds `limit` bytes.
    pub fn decompress_limited(
        self,
        payload: Vec<u8>,
        limit: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Compression::None => Ok(payload),
            Compression::Gzip => {
                let mut decoder = GzDecoder::new(payload.as_slice()).take(limit as u64 + 1);
                let mut decompressed = Vec::new();
                decoder
                    .read_to_end(&mut decompressed)
                    .map_err(|e| ProtocolError::Compression(e.to_string()))?;
                if decompressed.len() > limit {
                    return Err(ProtocolError::Compression(format!(
                        "payload expands beyond {} bytes",
                        limit
                    )));
                }
                Ok(decompressed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_restores_payload() {
        let payload = br#"{"dialog":{"bot_name":"assistant"}}"#.repeat(20);
        let compressed = Compression::Gzip.compress(&payload).unwrap();
        assert_ne!(compressed, payload);
        assert_eq!(compressed[0], 0x1f);
        assert_eq!(Compression::Gzip.decompress(compressed).unwrap(), payload);
    }

    #[test]
    fn test_none_is_identity() {
        let payload = vec![1u8, 2, 3];
        assert_eq!(Compression::None.compress(&payload).unwrap(), payload);
        assert_eq!(Compression::None.decompress(payload.clone()).unwrap(), payload);
    }

    #[test]
    fn test_corrupt_gzip() {
        let result = Compression::Gzip.decompress(vec![0x1f, 0x8b, 0x00]);
        assert!(matches!(result, Err(ProtocolError::Compression(_))));
    }

    #[test]
    fn test_expansion_limit() {
        let payload = vec![0u8; 4096];
        let compressed = Compression::Gzip.compress(&payload).unwrap();
        assert!(compressed.len() < 100);

        assert_eq!(
            Compression::Gzip
                .decompress_limited(compressed.clone(), 4096)
                .unwrap()
                .len(),
            4096
        );
        assert!(matches!(
            Compression::Gzip.decompress_limited(compressed, 4095),
            Err(ProtocolError::Compression(_))
        ));
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            Compression::from_code(0x7),
            Err(ProtocolError::UnsupportedCompression(0x7))
        ));
    }
}
