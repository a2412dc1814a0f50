use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::ring_buffer::AudioRingBuffer;

/// Playback side of the ring buffer: satisfies fixed-size device requests.
#[derive(Clone)]
pub struct PlaybackSource {
    ring: Arc<AudioRingBuffer>,
    underruns: Arc<AtomicUsize>,
}

impl PlaybackSource {
    pub fn new(ring: Arc<AudioRingBuffer>) -> Self {
        Self {
            ring,
            underruns: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fill `out` from the buffer, padding any shortfall with silence.
    ///
    /// Returns the number of real samples written. Never blocks and never allocates.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let written = self.ring.pull_into(out);
        if written < out.len() {
            out[written..].fill(0.0);
            // An empty buffer between utterances is normal; only count partial blocks.
            if written > 0 {
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        written
    }

    /// Blocks that ran dry part-way through.
    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_pads_with_silence() {
        let ring = Arc::new(AudioRingBuffer::new(32));
        ring.push(&[0.1, 0.2, 0.3]);
        let source = PlaybackSource::new(Arc::clone(&ring));

        let mut block = [1.0f32; 5];
        assert_eq!(source.fill(&mut block), 3);
        assert_eq!(block, [0.1, 0.2, 0.3, 0.0, 0.0]);
        assert_eq!(source.underruns(), 1);

        assert_eq!(source.fill(&mut block), 0);
        assert_eq!(block, [0.0; 5]);
        assert_eq!(source.underruns(), 1);
    }

    #[test]
    fn test_full_block() {
        let ring = Arc::new(AudioRingBuffer::new(32));
        ring.push(&[0.5; 8]);
        let source = PlaybackSource::new(ring);
        let mut block = [0.0f32; 4];
        assert_eq!(source.fill(&mut block), 4);
        assert_eq!(block, [0.5; 4]);
        assert_eq!(source.underruns(), 0);
    }
}
