//! Raw sample layouts used on the wire.
//!
//! Capture frames carry s16le mono. Playback frames carry f32le mono by
//! default, or s16le when the session asks for it.

use super::AudioError;

/// Encode i16 samples as little-endian bytes.
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode s16le bytes. An odd byte count means the block was cut mid-sample.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::InvalidBlock(format!(
            "s16le block has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// Decode f32le bytes. Trailing bytes that do not form a whole sample are ignored.
pub fn f32le_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Decode s16le bytes straight to normalised f32. A trailing odd byte is ignored.
pub fn s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}
