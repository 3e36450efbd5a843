//! Monophonic pitch estimation by normalized autocorrelation.
//!
//! The estimator keeps the most recent `window` microphone samples in a
//! ring and, on request, computes the normalized square difference
//! function (NSDF) of that window:
//!
//! ```text
//! r(τ) = 2 Σ x[i]·x[i+τ] / Σ (x[i]² + x[i+τ]²)
//! ```
//!
//! Peaks are only considered after the NSDF first goes negative, so the
//! zero-lag lobe is never mistaken for a period. Of the remaining local
//! maxima the first one within `peak_ratio` of the best wins, which keeps
//! the estimate off octave-low multiples. The winning lag is refined with
//! a parabola through its neighbours.

use alloc::vec;
use alloc::vec::Vec;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Tunables for [`PitchEstimator`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorConfig {
    /// Analysis window in samples; rounded up to a power of two.
    pub window: usize,
    pub min_hz: f32,
    pub max_hz: f32,
    /// Minimum NSDF peak height for a voiced result.
    pub clarity_threshold: f32,
    /// Minimum RMS level for a voiced result.
    pub power_threshold: f32,
    /// A peak is accepted once it reaches this fraction of the best peak.
    pub peak_ratio: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window: 2048,
            min_hz: 60.0,
            max_hz: 1500.0,
            clarity_threshold: 0.8,
            power_threshold: 0.01,
            peak_ratio: 0.9,
        }
    }
}

/// A voiced estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchEstimate {
    pub frequency_hz: f32,
    /// Height of the chosen NSDF peak, 0..=1.
    pub clarity: f32,
}

pub struct PitchEstimator {
    config: EstimatorConfig,
    sample_rate: u32,
    ring: HeapRb<f32>,
    /// Oldest-first copy of the ring.
    frame: Vec<f32>,
    nsdf: Vec<f32>,
    min_lag: usize,
    max_lag: usize,
    last: Option<PitchEstimate>,
}

impl PitchEstimator {
    pub fn new(sample_rate: u32, config: EstimatorConfig) -> Self {
        let sample_rate = sample_rate.max(1);
        let window = config.window.max(64).next_power_of_two();
        let sr = sample_rate as f32;
        // At least two lags so the peak search has neighbours on both sides
        let max_lag = ((sr / config.min_hz.max(1.0)).ceil() as usize).clamp(2, window / 2);
        let min_lag = ((sr / config.max_hz.max(1.0)).floor() as usize).clamp(2, max_lag);

        Self {
            config: EstimatorConfig { window, ..config },
            sample_rate,
            ring: HeapRb::new(window),
            frame: vec![0.0; window],
            nsdf: vec![0.0; max_lag + 2],
            min_lag,
            max_lag,
            last: None,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn window_len(&self) -> usize {
        self.config.window
    }

    /// Samples currently buffered (saturates at the window length).
    pub fn buffered(&self) -> usize {
        self.ring.occupied_len()
    }

    /// Append microphone samples, discarding the oldest once full.
    pub fn push(&mut self, samples: &[f32]) {
        self.ring.push_slice_overwrite(samples);
    }

    /// Drop all buffered audio and the last estimate.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.last = None;
    }

    /// Most recent voiced frequency, if the last estimate was voiced.
    pub fn last_frequency(&self) -> Option<f32> {
        self.last.map(|e| e.frequency_hz)
    }

    /// Estimate the fundamental of the current window.
    ///
    /// `None` until a full window has been pushed, and for silent, noisy
    /// or out-of-range input.
    pub fn estimate(&mut self) -> Option<PitchEstimate> {
        self.last = self.analyze();
        self.last
    }

    fn analyze(&mut self) -> Option<PitchEstimate> {
        let n = self.frame.len();
        if self.ring.occupied_len() < n {
            return None;
        }
        let (a, b) = self.ring.as_slices();
        self.frame[..a.len()].copy_from_slice(a);
        self.frame[a.len()..a.len() + b.len()].copy_from_slice(b);

        let energy: f32 = self.frame.iter().map(|x| x * x).sum();
        let rms = (energy / n as f32).sqrt();
        if !(rms >= self.config.power_threshold) {
            return None;
        }

        self.compute_nsdf();
        let (lag, clarity) = self.pick_peak()?;
        let frequency_hz = self.sample_rate as f32 / lag;
        if !frequency_hz.is_finite() || frequency_hz < self.config.min_hz || frequency_hz > self.config.max_hz {
            return None;
        }
        Some(PitchEstimate { frequency_hz, clarity })
    }

    fn compute_nsdf(&mut self) {
        let x = &self.frame;
        let n = x.len();
        self.nsdf[0] = 1.0;
        for tau in 1..self.nsdf.len() {
            let mut acf = 0.0;
            let mut norm = 0.0;
            for i in 0..n - tau {
                let (p, q) = (x[i], x[i + tau]);
                acf += p * q;
                norm += p * p + q * q;
            }
            self.nsdf[tau] = if norm > 0.0 { 2.0 * acf / norm } else { 0.0 };
        }
    }

    /// Returns the refined lag and its clarity.
    fn pick_peak(&self) -> Option<(f32, f32)> {
        let nsdf = &self.nsdf;
        let is_peak = |tau: usize| nsdf[tau] > 0.0 && nsdf[tau] > nsdf[tau - 1] && nsdf[tau] >= nsdf[tau + 1];

        let first_negative = nsdf.iter().position(|&v| v < 0.0)?;
        let lo = self.min_lag.max(first_negative);
        let hi = self.max_lag;
        if lo > hi {
            return None;
        }

        let best = (lo..=hi)
            .filter(|&tau| is_peak(tau))
            .map(|tau| nsdf[tau])
            .fold(0.0f32, f32::max);
        if best < self.config.clarity_threshold {
            return None;
        }

        let cutoff = best * self.config.peak_ratio;
        let tau = (lo..=hi).find(|&tau| is_peak(tau) && nsdf[tau] >= cutoff)?;

        let (y0, y1, y2) = (nsdf[tau - 1], nsdf[tau], nsdf[tau + 1]);
        let denom = y0 - 2.0 * y1 + y2;
        let shift = if denom != 0.0 { 0.5 * (y0 - y2) / denom } else { 0.0 };
        let clarity = (y1 - 0.25 * (y0 - y2) * shift).clamp(0.0, 1.0);
        Some((tau as f32 + shift, clarity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jr_ir::{map_estimate, TunerReading};

    const SR: u32 = 48_000;

    fn sine(hz: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (core::f32::consts::TAU * hz * i as f32 / SR as f32).sin())
            .collect()
    }

    fn estimator() -> PitchEstimator {
        PitchEstimator::new(SR, EstimatorConfig::default())
    }

    #[test]
    fn silent_buffer_is_unvoiced() {
        let mut est = estimator();
        est.push(&[0.0; 4096]);
        assert_eq!(est.estimate(), None);
        assert_eq!(map_estimate(est.last_frequency()), TunerReading::NoSignal);
    }

    #[test]
    fn partial_window_is_unvoiced() {
        let mut est = estimator();
        est.push(&sine(220.0, 0.5, 1000));
        assert_eq!(est.buffered(), 1000);
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn sine_220_within_one_hz() {
        let mut est = estimator();
        est.push(&sine(220.0, 0.5, 4096));
        let e = est.estimate().expect("voiced");
        assert!((e.frequency_hz - 220.0).abs() <= 1.0, "got {}", e.frequency_hz);
        assert!(e.clarity > 0.9);
    }

    #[test]
    fn tracks_across_the_range() {
        for hz in [82.41f32, 146.83, 440.0, 987.77] {
            let mut est = estimator();
            est.push(&sine(hz, 0.3, 2048));
            let e = est.estimate().expect("voiced");
            assert!((e.frequency_hz - hz).abs() / hz < 0.01, "{hz}: got {}", e.frequency_hz);
        }
    }

    #[test]
    fn harmonics_do_not_fool_it() {
        // Strong second harmonic over a 110 Hz fundamental
        let fund = sine(110.0, 0.3, 2048);
        let second = sine(220.0, 0.4, 2048);
        let mixed: Vec<f32> = fund.iter().zip(&second).map(|(a, b)| a + b).collect();
        let mut est = estimator();
        est.push(&mixed);
        let e = est.estimate().expect("voiced");
        assert!((e.frequency_hz - 110.0).abs() < 2.0, "got {}", e.frequency_hz);
    }

    #[test]
    fn noise_is_unvoiced() {
        let mut seed = 0x1234_5678u32;
        let noise: Vec<f32> = (0..2048)
            .map(|_| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (seed >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect();
        let mut est = estimator();
        est.push(&noise);
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn below_power_gate_is_unvoiced() {
        let mut est = estimator();
        est.push(&sine(220.0, 0.001, 2048));
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn window_keeps_newest_samples() {
        let mut est = estimator();
        est.push(&sine(220.0, 0.5, 2048));
        est.push(&sine(440.0, 0.5, 2048));
        let e = est.estimate().expect("voiced");
        assert!((e.frequency_hz - 440.0).abs() < 2.0);

        est.reset();
        assert_eq!(est.buffered(), 0);
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn window_rounds_to_power_of_two() {
        let est = PitchEstimator::new(SR, EstimatorConfig { window: 1500, ..Default::default() });
        assert_eq!(est.window_len(), 2048);
    }

    #[test]
    fn tiny_sample_rates_are_unvoiced() {
        for rate in [0, 1, 50] {
            let mut est = PitchEstimator::new(rate, EstimatorConfig::default());
            est.push(&[0.5f32, -0.5].repeat(2048));
            assert_eq!(est.estimate(), None, "rate {rate}");
        }
        let narrow = EstimatorConfig { min_hz: 40_000.0, max_hz: 45_000.0, ..Default::default() };
        let mut est = PitchEstimator::new(SR, narrow);
        est.push(&sine(440.0, 0.5, 2048));
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn a440_maps_to_a4() {
        let mut est = estimator();
        est.push(&sine(440.0, 0.5, 2048));
        let reading = map_estimate(est.estimate().map(|e| e.frequency_hz));
        assert_eq!(reading.note().map(|n| n.name()), Some("A"));
        assert_eq!(reading.cents(), Some(0));
    }
}
