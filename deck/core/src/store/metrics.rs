//! Performance Metrics Ring Buffer

use std::collections::VecDeque;

use crate::messages::PerformanceSample;

/// Samples kept before the oldest is evicted
pub const METRICS_CAPACITY: usize = 100;

/// Bounded FIFO of recent response samples
#[derive(Clone, Debug)]
pub struct MetricsBuffer {
    samples: VecDeque<PerformanceSample>,
    capacity: usize,
}

impl Default for MetricsBuffer {
    fn default() -> Self {
        Self::with_capacity(METRICS_CAPACITY)
    }
}

impl MetricsBuffer {
    /// Create a buffer holding at most `capacity` samples
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, sample: PerformanceSample) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Mean response time in ms; 0 when empty
    #[must_use]
    pub fn average_response_time(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(|s| s.response_time).sum();
        total / self.samples.len() as f64
    }

    /// Samples oldest first
    pub fn iter(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    /// Most recent sample
    #[must_use]
    pub fn latest(&self) -> Option<&PerformanceSample> {
        self.samples.back()
    }

    /// Number of samples held
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(response_time: f64, timestamp: u64) -> PerformanceSample {
        PerformanceSample {
            response_time,
            tokens_per_second: 10.0,
            total_tokens: 1,
            load_time: None,
            timestamp,
        }
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let mut buffer = MetricsBuffer::default();
        for i in 0..=METRICS_CAPACITY as u64 {
            buffer.push(sample(1.0, i));
        }
        assert_eq!(buffer.len(), METRICS_CAPACITY);
        assert_eq!(buffer.iter().next().unwrap().timestamp, 1);
        assert_eq!(buffer.latest().unwrap().timestamp, METRICS_CAPACITY as u64);
    }

    #[test]
    fn test_average() {
        let mut buffer = MetricsBuffer::with_capacity(2);
        assert!(buffer.average_response_time().abs() < f64::EPSILON);
        buffer.push(sample(100.0, 1));
        buffer.push(sample(300.0, 2));
        buffer.push(sample(500.0, 3));
        assert!((buffer.average_response_time() - 400.0).abs() < f64::EPSILON);
    }
}
