//! Fixed-capacity sample FIFO shared between the network receive loop
//! (producer) and the playback device callback (consumer).
//!
//! Storage is allocated once. Each push/pull takes the lock for a couple of
//! `copy_from_slice` calls and nothing else, so neither side can stall the
//! other for long.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

struct RingState {
    samples: Box<[f32]>,
    head: usize,
    len: usize,
}

pub struct AudioRingBuffer {
    state: Mutex<RingState>,
    capacity: usize,
}

impl AudioRingBuffer {
    /// Create a buffer holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            state: Mutex::new(RingState {
                samples: vec![0.0; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
            }),
            capacity,
        }
    }

    /// Capacity for `max_buffered` worth of mono audio at `sample_rate`.
    pub fn with_duration(sample_rate: u32, max_buffered: Duration) -> Self {
        let capacity = (sample_rate as f64 * max_buffered.as_secs_f64()) as usize;
        Self::new(capacity)
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        // A panic while holding the lock cannot leave indices half-updated
        // in a way that breaks memory safety, so keep using the data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append samples at the tail. When the result would exceed capacity the
    /// oldest samples are dropped so the most recent `capacity` remain.
    ///
    /// Returns the number of samples discarded.
    pub fn push(&self, samples: &[f32]) -> usize {
        let capacity = self.capacity;
        let mut state = self.lock();

        if samples.len() >= capacity {
            let discarded = state.len + samples.len() - capacity;
            state
                .samples
                .copy_from_slice(&samples[samples.len() - capacity..]);
            state.head = 0;
            state.len = capacity;
            return discarded;
        }

        let tail = (state.head + state.len) % capacity;
        let first = samples.len().min(capacity - tail);
        state.samples[tail..tail + first].copy_from_slice(&samples[..first]);
        state.samples[..samples.len() - first].copy_from_slice(&samples[first..]);

        let new_len = state.len + samples.len();
        if new_len > capacity {
            let discarded = new_len - capacity;
            state.head = (state.head + discarded) % capacity;
            state.len = capacity;
            discarded
        } else {
            state.len = new_len;
            0
        }
    }

    /// Move up to `out.len()` samples from the head into `out`, oldest first.
    ///
    /// Returns how many samples were written; the rest of `out` is untouched.
    pub fn pull_into(&self, out: &mut [f32]) -> usize {
        let capacity = self.capacity;
        let mut state = self.lock();

        let count = out.len().min(state.len);
        let head = state.head;
        let first = count.min(capacity - head);
        out[..first].copy_from_slice(&state.samples[head..head + first]);
        out[first..count].copy_from_slice(&state.samples[..count - first]);

        state.head = (head + count) % capacity;
        state.len -= count;
        count
    }

    /// Remove up to `n` samples from the head. Returns fewer when fewer are buffered.
    pub fn pull(&self, n: usize) -> Vec<f32> {
        let mut out = vec![0.0; n.min(self.capacity)];
        let count = self.pull_into(&mut out);
        out.truncate(count);
        out
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.head = 0;
        state.len = 0;
    }
}

impl std::fmt::Debug for AudioRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ramp(start: usize, count: usize) -> Vec<f32> {
        (start..start + count).map(|i| i as f32).collect()
    }

    #[test]
    fn test_fifo_order() {
        let ring = AudioRingBuffer::new(8);
        assert_eq!(ring.push(&ramp(0, 5)), 0);
        assert_eq!(ring.pull(3), ramp(0, 3));
        assert_eq!(ring.push(&ramp(5, 4)), 0);
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.pull(6), ramp(3, 6));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_overflow_keeps_latest() {
        let ring = AudioRingBuffer::new(10);
        assert_eq!(ring.push(&ramp(0, 7)), 0);
        assert_eq!(ring.push(&ramp(7, 6)), 3);
        assert_eq!(ring.len(), 10);
        assert_eq!(ring.pull(10), ramp(3, 10));
    }

    #[test]
    fn test_single_push_larger_than_capacity() {
        let ring = AudioRingBuffer::new(4);
        ring.push(&ramp(0, 2));
        assert_eq!(ring.push(&ramp(2, 9)), 7);
        assert_eq!(ring.pull(8), ramp(7, 4));
    }

    #[test]
    fn test_overflow_after_wrap() {
        let ring = AudioRingBuffer::new(6);
        ring.push(&ramp(0, 5));
        assert_eq!(ring.pull(3), ramp(0, 3));
        // head at 3 with two samples buffered; this push wraps and overflows by one
        assert_eq!(ring.push(&ramp(5, 5)), 1);
        assert_eq!(ring.pull(6), ramp(4, 6));
    }

    #[test]
    fn test_underflow_returns_available() {
        let ring = AudioRingBuffer::new(16);
        ring.push(&ramp(0, 3));
        let pulled = ring.pull(10);
        assert_eq!(pulled, ramp(0, 3));
        assert!(ring.pull(4).is_empty());
    }

    #[test]
    fn test_pull_into_leaves_rest_untouched() {
        let ring = AudioRingBuffer::new(16);
        ring.push(&[0.5, 0.25]);
        let mut out = [9.0f32; 4];
        assert_eq!(ring.pull_into(&mut out), 2);
        assert_eq!(out, [0.5, 0.25, 9.0, 9.0]);
    }

    #[test]
    fn test_clear() {
        let ring = AudioRingBuffer::new(4);
        ring.push(&ramp(0, 3));
        ring.clear();
        assert!(ring.is_empty());
        ring.push(&ramp(10, 2));
        assert_eq!(ring.pull(4), ramp(10, 2));
    }

    #[test]
    fn test_capacity_from_duration() {
        let ring = AudioRingBuffer::with_duration(24_000, Duration::from_secs(100));
        assert_eq!(ring.capacity(), 2_400_000);
    }

    #[test]
    fn test_concurrent_producer_consumer_preserves_order() {
        let ring = Arc::new(AudioRingBuffer::new(1 << 16));
        let total = 50_000usize;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for chunk_start in (0..total).step_by(100) {
                    ring.push(&ramp(chunk_start, 100));
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut block = [0.0f32; 64];
        while received.len() < total {
            let n = ring.pull_into(&mut block);
            received.extend_from_slice(&block[..n]);
            if n == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        // Capacity exceeds the total, so nothing was dropped.
        assert_eq!(received, ramp(0, total));
    }
}
