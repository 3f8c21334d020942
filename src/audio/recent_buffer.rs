//! Rolling buffer of the most recent audio samples for one source.
//!
//! Shared between the frame pump and the speaker identifier. All access
//! goes through one mutex with minimal critical sections: append + trim on
//! the write side, a copy-out on the read side.

use std::sync::Mutex;

pub struct RecentAudioBuffer {
    samples: Mutex<Vec<f32>>,
    capacity: usize,
}

impl RecentAudioBuffer {
    /// `capacity` is in samples (seconds × sample rate).
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append new samples, trimming the oldest once over capacity.
    pub fn append(&self, new: &[f32]) {
        let mut buf = self.samples.lock().unwrap();
        buf.extend_from_slice(new);
        if buf.len() > self.capacity {
            let excess = buf.len() - self.capacity;
            buf.drain(0..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peak absolute amplitude of the buffered audio.
    pub fn peak(&self) -> f32 {
        let buf = self.samples.lock().unwrap();
        buf.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Copy out the most recent `n` samples (or everything, if shorter).
    pub fn tail(&self, n: usize) -> Vec<f32> {
        let buf = self.samples.lock().unwrap();
        let start = buf.len().saturating_sub(n);
        buf[start..].to_vec()
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_within_capacity_keeps_everything() {
        let buf = RecentAudioBuffer::new(10);
        buf.append(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn append_over_capacity_trims_oldest() {
        let buf = RecentAudioBuffer::new(4);
        buf.append(&[1.0, 2.0, 3.0]);
        buf.append(&[4.0, 5.0]);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.tail(4), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn tail_shorter_than_buffer() {
        let buf = RecentAudioBuffer::new(10);
        buf.append(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buf.tail(2), vec![3.0, 4.0]);
    }

    #[test]
    fn tail_longer_than_buffer_returns_all() {
        let buf = RecentAudioBuffer::new(10);
        buf.append(&[1.0, 2.0]);
        assert_eq!(buf.tail(100), vec![1.0, 2.0]);
    }

    #[test]
    fn peak_tracks_absolute_amplitude() {
        let buf = RecentAudioBuffer::new(10);
        buf.append(&[0.1, -0.8, 0.3]);
        assert!((buf.peak() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn clear_empties_buffer() {
        let buf = RecentAudioBuffer::new(10);
        buf.append(&[1.0; 5]);
        buf.clear();
        assert!(buf.is_empty());
    }
}
