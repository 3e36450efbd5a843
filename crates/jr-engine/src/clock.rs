//! Tempo-parameterized transport clock.
//!
//! Monotonic time is the output frame index. The beat position is
//! `ref_beats + (now - ref_frame) * bpm / 60 / sample_rate`; every tempo
//! change reseats `(ref_frame, ref_beats)` at the change instant so the
//! position stays continuous and only its rate of advance changes.

use jr_ir::MusicalTime;
use thiserror::Error;

/// Absolute output frame index.
pub type FramePos = u64;

#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum ClockError {
    #[error("invalid tempo {0}: must be a positive, finite BPM")]
    InvalidTempo(f64),
}

pub(crate) fn validate_tempo(bpm: f64) -> Result<f64, ClockError> {
    if bpm > 0.0 && bpm.is_finite() {
        Ok(bpm)
    } else {
        Err(ClockError::InvalidTempo(bpm))
    }
}

/// The single tempo clock every scheduled event is measured against.
#[derive(Clone, Debug)]
pub struct TransportClock {
    sample_rate: u32,
    tempo_bpm: f64,
    running: bool,
    /// Frame at which the current reference point was taken. While a start
    /// is pending this lies in the future.
    ref_frame: FramePos,
    /// Beat position at `ref_frame`; the frozen position while stopped.
    ref_beats: f64,
}

impl TransportClock {
    pub fn new(sample_rate: u32, tempo_bpm: f64) -> Result<Self, ClockError> {
        Ok(Self {
            sample_rate: sample_rate.max(1),
            tempo_bpm: validate_tempo(tempo_bpm)?,
            running: false,
            ref_frame: 0,
            ref_beats: 0.0,
        })
    }

    pub fn tempo(&self) -> f64 {
        self.tempo_bpm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start advancing from the frozen position at frame `at`.
    ///
    /// Until `at` is reached the position holds still, which is how a
    /// start with a little lookahead is expressed. Starting a running
    /// clock is a no-op.
    pub fn start(&mut self, at: FramePos) {
        if self.running {
            return;
        }
        self.ref_frame = at;
        self.running = true;
    }

    /// Freeze the position at `now`.
    pub fn stop(&mut self, now: FramePos) {
        if !self.running {
            return;
        }
        self.ref_beats = self.elapsed_beats(now);
        self.ref_frame = now;
        self.running = false;
    }

    /// Change the tempo effective at `now`. Non-positive or non-finite
    /// values are rejected and the previous tempo is kept.
    pub fn set_tempo(&mut self, bpm: f64, now: FramePos) -> Result<(), ClockError> {
        let bpm = validate_tempo(bpm)?;
        if self.running && now > self.ref_frame {
            self.ref_beats = self.elapsed_beats(now);
            self.ref_frame = now;
        }
        self.tempo_bpm = bpm;
        Ok(())
    }

    /// Continuous beat position at frame `now`.
    pub fn elapsed_beats(&self, now: FramePos) -> f64 {
        if !self.running || now <= self.ref_frame {
            return self.ref_beats;
        }
        let frames = (now - self.ref_frame) as f64;
        self.ref_beats + frames * self.tempo_bpm / (60.0 * self.sample_rate as f64)
    }

    /// Beat position at `now`, quantized to the sub-beat grid.
    pub fn position(&self, now: FramePos) -> MusicalTime {
        MusicalTime::from_beats_f64(self.elapsed_beats(now))
    }

    /// Output frames per beat at the current tempo.
    pub fn frames_per_beat(&self) -> f64 {
        60.0 * self.sample_rate as f64 / self.tempo_bpm
    }

    /// First frame at which `beat` will have been reached under the current
    /// tempo. `None` while stopped or when the beat is already behind.
    pub fn beat_to_frame(&self, beat: MusicalTime) -> Option<FramePos> {
        if !self.running {
            return None;
        }
        let ahead = beat.as_beats_f64() - self.ref_beats;
        if ahead < 0.0 {
            return None;
        }
        Some(self.ref_frame + (ahead * self.frames_per_beat()).ceil() as FramePos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: u32 = 48_000;

    fn running_clock(bpm: f64) -> TransportClock {
        let mut clock = TransportClock::new(SR, bpm).unwrap();
        clock.start(0);
        clock
    }

    #[test]
    fn stopped_clock_does_not_advance() {
        let clock = TransportClock::new(SR, 120.0).unwrap();
        assert_eq!(clock.elapsed_beats(0), 0.0);
        assert_eq!(clock.elapsed_beats(SR as u64 * 10), 0.0);
    }

    #[test]
    fn advances_at_tempo_rate() {
        let clock = running_clock(120.0);
        assert_eq!(clock.elapsed_beats(SR as u64), 2.0);
        assert_eq!(clock.elapsed_beats(SR as u64 * 4), 8.0);
    }

    #[test]
    fn tempo_change_is_continuous() {
        for bpm in [0.5, 40.0, 97.3, 200.0, 1000.0] {
            let mut clock = running_clock(120.0);
            let change = SR as u64 * 3 / 2;
            let before = clock.elapsed_beats(change);
            clock.set_tempo(bpm, change).unwrap();
            let after = clock.elapsed_beats(change);
            assert_relative_eq!(before, after, epsilon = 1e-12);

            // One frame later the position moved by exactly one frame at the new rate
            let step = clock.elapsed_beats(change + 1) - after;
            assert_relative_eq!(step, bpm / 60.0 / SR as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn rejects_non_positive_tempo() {
        let mut clock = running_clock(90.0);
        assert_eq!(clock.set_tempo(0.0, 10), Err(ClockError::InvalidTempo(0.0)));
        assert_eq!(clock.set_tempo(-5.0, 10), Err(ClockError::InvalidTempo(-5.0)));
        assert!(clock.set_tempo(f64::NAN, 10).is_err());
        assert!(clock.set_tempo(f64::INFINITY, 10).is_err());
        assert_eq!(clock.tempo(), 90.0);
        assert!(TransportClock::new(SR, 0.0).is_err());
    }

    #[test]
    fn stop_freezes_and_start_resumes() {
        let mut clock = running_clock(60.0);
        clock.stop(SR as u64 * 2);
        assert_eq!(clock.elapsed_beats(SR as u64 * 2), 2.0);
        assert_eq!(clock.elapsed_beats(SR as u64 * 5), 2.0);

        clock.start(SR as u64 * 5);
        assert_eq!(clock.elapsed_beats(SR as u64 * 6), 3.0);
    }

    #[test]
    fn delayed_start_holds_until_reference() {
        let mut clock = TransportClock::new(SR, 120.0).unwrap();
        clock.start(4_800);
        assert_eq!(clock.elapsed_beats(0), 0.0);
        assert_eq!(clock.elapsed_beats(4_800), 0.0);
        assert!(clock.elapsed_beats(4_801) > 0.0);

        // Tempo change before the start point keeps the reference
        clock.set_tempo(60.0, 100).unwrap();
        assert_eq!(clock.elapsed_beats(4_800 + SR as u64), 1.0);
    }

    #[test]
    fn tempo_change_while_stopped_keeps_position() {
        let mut clock = running_clock(120.0);
        clock.stop(SR as u64);
        clock.set_tempo(60.0, SR as u64 * 2).unwrap();
        assert_eq!(clock.elapsed_beats(SR as u64 * 3), 2.0);
    }

    #[test]
    fn beat_to_frame_inverts_position() {
        let clock = running_clock(120.0);
        assert_eq!(clock.beat_to_frame(MusicalTime::from_beats(4)), Some(SR as u64 * 2));
        assert_eq!(clock.frames_per_beat(), 24_000.0);
        assert_eq!(TransportClock::new(SR, 120.0).unwrap().beat_to_frame(MusicalTime::zero()), None);
    }
}
