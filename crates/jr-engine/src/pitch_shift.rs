//! Delay-line pitch shifter.
//!
//! Two read taps sweep through a short delay line at a rate set by the
//! pitch ratio, half a window apart. Each tap is faded in and out with an
//! equal-power window so the jump when a tap wraps is inaudible. All
//! buffers are allocated up front; `process` never allocates.

use alloc::vec;
use alloc::vec::Vec;
use core::f32::consts::PI;

use crate::frame::Frame;

/// Delay window length in seconds.
pub const WINDOW_SECS: f32 = 0.1;

pub struct PitchShift {
    buffer: Vec<Frame>,
    write_pos: usize,
    window: f32,
    /// Tap phase in 0..1; the delay is `phase * window`.
    phase: f32,
    /// Per-frame phase advance: `(1 - ratio) / window`.
    phase_step: f32,
    semitones: f32,
}

impl PitchShift {
    pub fn new(semitones: f32, sample_rate: u32) -> Self {
        let window = (WINDOW_SECS * sample_rate.max(1) as f32).max(4.0);
        let mut shift = Self {
            buffer: vec![Frame::silence(); window as usize + 2],
            write_pos: 0,
            window,
            phase: 0.0,
            phase_step: 0.0,
            semitones: 0.0,
        };
        shift.set_semitones(semitones);
        shift
    }

    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    pub fn ratio(&self) -> f32 {
        (self.semitones / 12.0).exp2()
    }

    pub fn set_semitones(&mut self, semitones: f32) {
        self.semitones = if semitones.is_finite() { semitones } else { 0.0 };
        self.phase_step = (1.0 - self.ratio()) / self.window;
    }

    pub fn reset(&mut self) {
        self.buffer.fill(Frame::silence());
        self.write_pos = 0;
        self.phase = 0.0;
    }

    /// Read `delay` frames behind the write head, linearly interpolated.
    fn tap(&self, delay: f32) -> Frame {
        let len = self.buffer.len();
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let a = self.buffer[(self.write_pos + len - whole % len) % len];
        let b = self.buffer[(self.write_pos + 2 * len - whole % len - 1) % len];
        Frame {
            left: a.left + (b.left - a.left) * frac,
            right: a.right + (b.right - a.right) * frac,
        }
    }

    #[inline]
    pub fn process(&mut self, input: Frame) -> Frame {
        self.buffer[self.write_pos] = input;

        let p1 = self.phase;
        let p2 = (p1 + 0.5) % 1.0;
        let mut out = self.tap(p1 * self.window).scaled((PI * p1).sin());
        out.mix(self.tap(p2 * self.window).scaled((PI * p2).sin()));

        self.phase = (self.phase + self.phase_step).rem_euclid(1.0);
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48_000;

    fn zero_crossings(frames: &[Frame]) -> usize {
        frames
            .windows(2)
            .filter(|w| (w[0].left < 0.0) != (w[1].left < 0.0))
            .count()
    }

    fn shift_sine(semitones: f32, hz: f32, secs: usize) -> Vec<Frame> {
        let mut shift = PitchShift::new(semitones, SR);
        (0..SR as usize * secs)
            .map(|i| {
                let x = (2.0 * PI * hz * i as f32 / SR as f32).sin();
                shift.process(Frame::mono(x))
            })
            .collect()
    }

    #[test]
    fn octave_up_doubles_frequency() {
        let out = shift_sine(12.0, 440.0, 2);
        // Skip the first window while the delay line fills
        let crossings = zero_crossings(&out[SR as usize..]);
        let expected = 2 * 880;
        assert!(
            crossings.abs_diff(expected) < expected / 20,
            "{crossings} crossings, expected about {expected}"
        );
    }

    #[test]
    fn octave_down_halves_frequency() {
        let out = shift_sine(-12.0, 440.0, 2);
        let crossings = zero_crossings(&out[SR as usize..]);
        let expected = 2 * 220;
        assert!(
            crossings.abs_diff(expected) < expected / 20,
            "{crossings} crossings, expected about {expected}"
        );
    }

    #[test]
    fn output_is_bounded() {
        for frame in shift_sine(7.0, 330.0, 1) {
            assert!(frame.peak() <= 1.5);
        }
    }

    #[test]
    fn ratio_follows_semitones() {
        let mut shift = PitchShift::new(12.0, SR);
        assert!((shift.ratio() - 2.0).abs() < 1e-6);
        shift.set_semitones(f32::NAN);
        assert_eq!(shift.semitones(), 0.0);
        assert_eq!(shift.ratio(), 1.0);
    }
}
