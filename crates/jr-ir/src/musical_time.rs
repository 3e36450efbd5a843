//! Beat-based time representation.
//!
//! `MusicalTime` is the beat-space coordinate every scheduled event lives
//! in. Wall-clock time only enters through the transport's tempo, so a
//! position expressed here survives tempo changes unchanged.

/// Subdivisions per beat. LCM(1..16) = 720720, so quarter-note triplets,
/// sixteenths and quintuplets all land on whole sub-beats.
pub const SUB_BEAT_UNIT: u32 = 720_720;

/// A position in musical time (beats + fractional sub-beat).
///
/// Ordering: beat is primary, sub_beat is secondary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MusicalTime {
    /// Whole beats from transport start
    pub beat: u64,
    /// Fraction of a beat: 0..SUB_BEAT_UNIT
    pub sub_beat: u32,
}

impl MusicalTime {
    /// The zero position (transport start).
    pub const fn zero() -> Self {
        Self { beat: 0, sub_beat: 0 }
    }

    /// Create a time at an exact beat boundary.
    pub const fn from_beats(beat: u64) -> Self {
        Self { beat, sub_beat: 0 }
    }

    /// Create a time from a total count of sub-beats.
    pub const fn from_sub_beats(total: u64) -> Self {
        Self {
            beat: total / SUB_BEAT_UNIT as u64,
            sub_beat: (total % SUB_BEAT_UNIT as u64) as u32,
        }
    }

    /// Total sub-beats since zero.
    pub const fn to_sub_beats(self) -> u64 {
        self.beat * SUB_BEAT_UNIT as u64 + self.sub_beat as u64
    }

    /// Quantize a fractional beat count, rounding down to the sub-beat grid.
    ///
    /// Negative and non-finite inputs clamp to zero.
    pub fn from_beats_f64(beats: f64) -> Self {
        if !(beats > 0.0) || !beats.is_finite() {
            return Self::zero();
        }
        let whole = libm::floor(beats);
        let frac = beats - whole;
        let sub = libm::floor(frac * SUB_BEAT_UNIT as f64) as u32;
        Self {
            beat: whole as u64,
            sub_beat: sub.min(SUB_BEAT_UNIT - 1),
        }
    }

    /// Fractional beat count.
    pub fn as_beats_f64(self) -> f64 {
        self.beat as f64 + self.sub_beat as f64 / SUB_BEAT_UNIT as f64
    }

    /// Advance by a raw number of sub-beats.
    pub const fn add_sub_beats(self, sub_beats: u64) -> Self {
        Self::from_sub_beats(self.to_sub_beats() + sub_beats)
    }

    /// Smallest multiple of `step` sub-beats strictly after `self`.
    ///
    /// A zero step has no grid; `self` is returned unchanged.
    pub const fn next_multiple_after(self, step: u64) -> Self {
        if step == 0 {
            return self;
        }
        let n = self.to_sub_beats() / step + 1;
        Self::from_sub_beats(n * step)
    }
}

impl PartialOrd for MusicalTime {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MusicalTime {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.beat.cmp(&other.beat).then(self.sub_beat.cmp(&other.sub_beat))
    }
}

impl core::fmt::Display for MusicalTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}+{}/{}", self.beat, self.sub_beat, SUB_BEAT_UNIT)
    }
}
