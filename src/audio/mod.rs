pub mod capture;
pub mod device;
pub mod pcm;
pub mod playback;
pub mod ring_buffer;

pub use capture::{CaptureSink, CaptureStreamer};
pub use device::{CaptureStream, PlaybackStream};
pub use playback::PlaybackSource;
pub use ring_buffer::AudioRingBuffer;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid audio block: {0}")]
    InvalidBlock(String),

    #[error("Capture queue closed")]
    QueueClosed,
}
