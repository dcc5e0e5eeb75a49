//! Windowed frequency estimation from peak spacing.
//!
//! The estimator scans a full window left to right, accepts local maxima
//! that clear a minimum height and sit far enough from the previously
//! accepted peak, and converts the mean peak gap into a frequency.

use crate::config::LiveConfig;
use serde::Serialize;

/// Result of analysing one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrequencyEstimate {
    /// Dominant frequency in Hz, absent with fewer than two peaks.
    pub frequency: Option<f64>,
    /// Amplitude at the most recent accepted peak (0.0 with no peaks).
    pub peak_amplitude: f64,
    /// Number of accepted peaks.
    pub peak_count: usize,
    /// Whether the last accepted peak strictly exceeds the detection height.
    pub peak_above_height: bool,
}

impl FrequencyEstimate {
    /// Estimate carrying no frequency.
    pub fn invalid() -> Self {
        Self {
            frequency: None,
            peak_amplitude: 0.0,
            peak_count: 0,
            peak_above_height: false,
        }
    }

    #[cfg(test)]
    pub fn is_valid(&self) -> bool {
        self.frequency.is_some()
    }
}

/// Peak-spacing frequency estimator.
#[derive(Debug, Clone)]
pub struct FrequencyEstimator {
    min_peak_height: f64,
    min_peak_separation: usize,
    sample_rate: f64,
    window_size: usize,
}

impl FrequencyEstimator {
    pub fn new(
        min_peak_height: f64,
        min_peak_separation: usize,
        sample_rate: f64,
        window_size: usize,
    ) -> Self {
        Self {
            min_peak_height,
            min_peak_separation: min_peak_separation.max(1),
            sample_rate,
            window_size,
        }
    }

    /// Build an estimator from the live loop configuration.
    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(
            config.peak_height(),
            config.min_peak_separation,
            config.sample_rate,
            config.window_size,
        )
    }

    /// Indices of accepted peaks, in ascending order.
    ///
    /// A peak is a strict local maximum: it rises from its left neighbour and
    /// the run of equal values it starts is followed by a lower value. Plateaus
    /// report their first index. The first and last samples are never peaks.
    pub fn find_peaks(&self, samples: &[f64]) -> Vec<usize> {
        let mut peaks: Vec<usize> = Vec::new();
        let n = samples.len();
        if n < 3 {
            return peaks;
        }

        let mut i = 1;
        while i < n - 1 {
            let value = samples[i];
            if value > samples[i - 1] {
                let mut end = i;
                while end + 1 < n && samples[end + 1] == value {
                    end += 1;
                }

                if end + 1 < n && samples[end + 1] < value {
                    let far_enough = peaks
                        .last()
                        .map_or(true, |&last| i - last >= self.min_peak_separation);
                    if value >= self.min_peak_height && far_enough {
                        peaks.push(i);
                    }
                }

                i = end + 1;
            } else {
                i += 1;
            }
        }

        peaks
    }

    /// Estimate the dominant frequency of a window.
    ///
    /// Partial windows (shorter than the configured window size) are never
    /// analysed and yield an invalid estimate.
    pub fn estimate(&self, samples: &[f64]) -> FrequencyEstimate {
        if samples.len() < self.window_size {
            return FrequencyEstimate::invalid();
        }

        let peaks = self.find_peaks(samples);
        let Some(&last_peak) = peaks.last() else {
            return FrequencyEstimate::invalid();
        };

        let peak_amplitude = samples[last_peak];
        let frequency = if peaks.len() > 1 {
            let gap_count = (peaks.len() - 1) as f64;
            let mean_gap_secs = peaks
                .windows(2)
                .map(|pair| (pair[1] - pair[0]) as f64 / self.sample_rate)
                .sum::<f64>()
                / gap_count;
            Some(1.0 / mean_gap_secs)
        } else {
            None
        };

        FrequencyEstimate {
            frequency,
            peak_amplitude,
            peak_count: peaks.len(),
            peak_above_height: peak_amplitude > self.min_peak_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    fn sine(frequency: f64, amplitude: f64, phase: f64, sample_rate: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| 512.0 + amplitude * (2.0 * PI * frequency * n as f64 / sample_rate + phase).sin())
            .collect()
    }

    fn default_estimator() -> FrequencyEstimator {
        FrequencyEstimator::from_config(&LiveConfig::default())
    }

    #[test]
    fn test_detects_38hz_sine() {
        let estimator = default_estimator();
        let samples = sine(38.0, 400.0, 0.0, 1000.0, 500);

        let estimate = estimator.estimate(&samples);
        let frequency = estimate.frequency.expect("sine should yield a frequency");

        assert!((frequency - 38.0).abs() < 1.0, "estimated {}", frequency);
        assert!(estimate.peak_count >= 18);
        assert!(estimate.peak_above_height);
        assert!(estimate.peak_amplitude > 700.0);
    }

    #[test]
    fn test_flat_window_is_invalid() {
        let estimator = default_estimator();
        let samples = vec![900.0; 500];

        let estimate = estimator.estimate(&samples);
        assert!(!estimate.is_valid());
        assert_eq!(estimate.peak_count, 0);
    }

    #[test]
    fn test_monotonic_window_is_invalid() {
        let estimator = default_estimator();
        let rising: Vec<f64> = (0..500).map(|n| n as f64 * 3.0).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();

        assert!(!estimator.estimate(&rising).is_valid());
        assert!(!estimator.estimate(&falling).is_valid());
        assert!(estimator.find_peaks(&rising).is_empty());
        assert!(estimator.find_peaks(&falling).is_empty());
    }

    #[test]
    fn test_single_peak_reports_amplitude_without_frequency() {
        let estimator = FrequencyEstimator::new(5.0, 1, 1000.0, 5);
        let estimate = estimator.estimate(&[0.0, 1.0, 9.0, 1.0, 0.0]);

        assert!(!estimate.is_valid());
        assert_eq!(estimate.peak_count, 1);
        assert_eq!(estimate.peak_amplitude, 9.0);
        assert!(estimate.peak_above_height);
    }

    #[test]
    fn test_plateau_reports_first_index() {
        let estimator = FrequencyEstimator::new(0.0, 1, 1000.0, 0);
        let peaks = estimator.find_peaks(&[0.0, 5.0, 5.0, 5.0, 1.0, 0.0, 3.0, 0.0]);
        assert_eq!(peaks, vec![1, 6]);
    }

    #[test]
    fn test_plateau_at_edge_is_not_a_peak() {
        let estimator = FrequencyEstimator::new(0.0, 1, 1000.0, 0);
        assert!(estimator.find_peaks(&[0.0, 5.0, 5.0]).is_empty());
    }

    #[test]
    fn test_height_filter() {
        let estimator = FrequencyEstimator::new(4.0, 1, 1000.0, 0);
        let peaks = estimator.find_peaks(&[0.0, 3.0, 0.0, 4.0, 0.0, 6.0, 0.0]);
        assert_eq!(peaks, vec![3, 5]);
    }

    #[test]
    fn test_peak_at_height_is_not_above_height() {
        let estimator = FrequencyEstimator::new(4.0, 1, 1000.0, 0);
        let estimate = estimator.estimate(&[0.0, 6.0, 0.0, 4.0, 0.0]);
        assert_eq!(estimate.peak_count, 2);
        assert_eq!(estimate.peak_amplitude, 4.0);
        assert!(!estimate.peak_above_height);
    }

    #[test]
    fn test_separation_is_greedy_left_to_right() {
        // The taller second peak is dropped because the first one came earlier.
        let estimator = FrequencyEstimator::new(0.0, 3, 1000.0, 0);
        let peaks = estimator.find_peaks(&[0.0, 2.0, 0.0, 9.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(peaks, vec![1, 5]);
    }

    #[test]
    fn test_frequency_from_mean_gap() {
        // Gaps of 10 and 20 samples at 1 kHz: mean 15 ms.
        let mut samples = vec![0.0; 40];
        samples[5] = 1.0;
        samples[15] = 1.0;
        samples[35] = 1.0;
        let estimator = FrequencyEstimator::new(0.5, 1, 1000.0, 40);

        let frequency = estimator.estimate(&samples).frequency.unwrap();
        assert!((frequency - 1000.0 / 15.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn test_partial_window_is_invalid(len in 0usize..500) {
            let estimator = default_estimator();
            let samples = sine(38.0, 400.0, 0.0, 1000.0, len);
            prop_assert!(!estimator.estimate(&samples).is_valid());
        }

        #[test]
        fn test_sine_frequency_within_resolution(
            frequency in 10.0f64..60.0,
            phase in 0.0f64..(2.0 * PI),
            amplitude in 300.0f64..500.0,
        ) {
            let sample_rate = 1000.0;
            let estimator = FrequencyEstimator::new(700.0, 10, sample_rate, 500);
            let samples = sine(frequency, amplitude, phase, sample_rate, 500);

            let estimate = estimator.estimate(&samples);
            let estimated = estimate.frequency;
            prop_assert!(estimated.is_some());
            prop_assert!((estimated.unwrap() - frequency).abs() < 1.0,
                "expected {} got {:?}", frequency, estimated);
        }
    }
}
