//! Sample decoding and the bounded sample buffer.

use std::collections::VecDeque;

/// Full-scale value of a decoded sample.
pub const SAMPLE_FULL_SCALE: u16 = 5;

/// Scales a raw 0-255 amplitude into the 0-5 range with integer truncation.
#[must_use]
pub const fn decode_sample(raw: u8) -> u8 {
    ((raw as u16 * SAMPLE_FULL_SCALE) / 255) as u8
}

/// Decodes every byte of a response, in arrival order.
pub fn decode_samples(raw: &[u8]) -> impl Iterator<Item = u8> + '_ {
    raw.iter().copied().map(decode_sample)
}

/// Most recent decoded samples, oldest first.
///
/// Pushing into a full sink evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct SampleSink {
    samples: VecDeque<u8>,
    capacity: usize,
}

impl SampleSink {
    /// Creates an empty sink holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends one sample.
    pub fn push(&mut self, sample: u8) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Decodes and appends a raw response.
    pub fn extend_raw(&mut self, raw: &[u8]) {
        for sample in decode_samples(raw) {
            self.push(sample);
        }
    }

    /// Removes all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if no sample is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.samples.iter().copied()
    }

    /// Copies the retained samples, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bounds() {
        assert_eq!(decode_sample(0), 0);
        assert_eq!(decode_sample(50), 0);
        assert_eq!(decode_sample(51), 1);
        assert_eq!(decode_sample(128), 2);
        assert_eq!(decode_sample(254), 4);
        assert_eq!(decode_sample(255), 5);
    }

    #[test]
    fn test_decode_is_floor_of_scaled_value() {
        for raw in 0..=255u8 {
            let expected = (u32::from(raw) * 5) / 255;
            assert_eq!(u32::from(decode_sample(raw)), expected);
            assert!(decode_sample(raw) <= 5);
        }
    }

    #[test]
    fn test_decode_samples_keeps_order() {
        let decoded: Vec<u8> = decode_samples(&[255, 0, 102, 153]).collect();
        assert_eq!(decoded, vec![5, 0, 2, 3]);
    }

    #[test]
    fn test_sink_evicts_oldest() {
        let mut sink = SampleSink::new(50);
        for i in 0..=50u8 {
            sink.push(i);
        }
        assert_eq!(sink.len(), 50);
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.first(), Some(&1));
        assert_eq!(snapshot.last(), Some(&50));
        assert!(!snapshot.contains(&0));
        assert_eq!(sink.iter().take(2).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_sink_extend_raw() {
        let mut sink = SampleSink::new(3);
        sink.extend_raw(&[0, 51, 102, 153, 204]);
        assert_eq!(sink.snapshot(), vec![2, 3, 4]);
    }

    #[test]
    fn test_sink_clear() {
        let mut sink = SampleSink::new(4);
        sink.extend_raw(&[255, 255]);
        sink.clear();
        assert!(sink.is_empty());
        assert_eq!(sink.capacity(), 4);
    }

    #[test]
    fn test_zero_capacity_sink_stays_empty() {
        let mut sink = SampleSink::new(0);
        sink.push(3);
        assert!(sink.is_empty());
    }
}
