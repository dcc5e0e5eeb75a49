//! Fixed-capacity sliding window of sensor readings.

use std::collections::VecDeque;

/// Ring buffer holding the most recent `capacity` samples in arrival order.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleBuffer {
    /// Create an empty buffer that holds at most `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new sample, removing the oldest if at capacity.
    pub fn push(&mut self, sample: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Ordered copy of the window, only once the buffer is full.
    ///
    /// Returns `None` while the buffer is still filling; analysis is deferred
    /// until a complete window is available.
    pub fn snapshot(&self) -> Option<Vec<f64>> {
        if self.is_full() {
            Some(self.contents())
        } else {
            None
        }
    }

    /// Ordered copy of whatever is currently buffered, full or not.
    pub fn contents(&self) -> Vec<f64> {
        self.iter().copied().collect()
    }

    /// Check whether the buffer holds a complete window.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.samples.len() == self.capacity
    }

    /// Get the current number of samples in the buffer.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get an iterator over all samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_buffer_keeps_last_window(
            samples in prop::collection::vec(-1000.0f64..1000.0, 0..300),
            capacity in 1usize..64,
        ) {
            let mut buffer = SampleBuffer::with_capacity(capacity);

            for sample in &samples {
                buffer.push(*sample);
                prop_assert!(buffer.len() <= capacity);
            }

            let expected_start = samples.len().saturating_sub(capacity);
            let held: Vec<f64> = buffer.iter().copied().collect();
            prop_assert_eq!(&held[..], &samples[expected_start..]);
            prop_assert_eq!(buffer.is_full(), samples.len() >= capacity);
        }
    }

    #[test]
    fn test_snapshot_only_when_full() {
        let mut buffer = SampleBuffer::with_capacity(3);
        assert!(buffer.snapshot().is_none());

        buffer.push(1.0);
        buffer.push(2.0);
        assert!(buffer.snapshot().is_none());
        assert_eq!(buffer.contents(), vec![1.0, 2.0]);

        buffer.push(3.0);
        assert_eq!(buffer.snapshot(), Some(vec![1.0, 2.0, 3.0]));

        buffer.push(4.0);
        assert_eq!(buffer.snapshot(), Some(vec![2.0, 3.0, 4.0]));
        // snapshot does not consume
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_zero_capacity_never_fills() {
        let mut buffer = SampleBuffer::with_capacity(0);
        buffer.push(1.0);
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
        assert!(buffer.snapshot().is_none());
    }
}
