//! Musical intervals used as scheduling periods.
//!
//! A beat is a quarter note and a measure is four beats (4/4). The textual
//! form follows the usual notation: `"4n"` quarter, `"8t"` eighth-note
//! triplet, `"8n."` dotted eighth, `"1m"` one measure.

use core::str::FromStr;
use thiserror::Error;

use crate::musical_time::SUB_BEAT_UNIT;

const BEAT: u64 = SUB_BEAT_UNIT as u64;
const WHOLE_NOTE: u64 = BEAT * 4;

/// Error returned when a subdivision string cannot be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ParseSubdivisionError {
    #[error("empty subdivision")]
    Empty,
    #[error("malformed subdivision notation")]
    Malformed,
    #[error("subdivision does not fall on the sub-beat grid")]
    Unrepresentable,
}

/// A musical interval measured in sub-beats. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subdivision {
    sub_beats: u64,
}

impl Subdivision {
    pub const WHOLE: Self = Self { sub_beats: WHOLE_NOTE };
    pub const HALF: Self = Self { sub_beats: BEAT * 2 };
    pub const QUARTER: Self = Self { sub_beats: BEAT };
    pub const EIGHTH: Self = Self { sub_beats: BEAT / 2 };
    pub const SIXTEENTH: Self = Self { sub_beats: BEAT / 4 };
    pub const EIGHTH_TRIPLET: Self = Self { sub_beats: BEAT / 3 };
    pub const MEASURE: Self = Self { sub_beats: WHOLE_NOTE };

    /// Build from a raw sub-beat length. Returns `None` for zero.
    pub const fn from_sub_beats(sub_beats: u64) -> Option<Self> {
        if sub_beats == 0 {
            None
        } else {
            Some(Self { sub_beats })
        }
    }

    /// `n` measures of 4/4.
    pub const fn measures(n: u32) -> Option<Self> {
        Self::from_sub_beats(WHOLE_NOTE * n as u64)
    }

    /// Length in sub-beats.
    pub const fn sub_beats(self) -> u64 {
        self.sub_beats
    }

    /// Length in (fractional) beats.
    pub fn beats(self) -> f64 {
        self.sub_beats as f64 / BEAT as f64
    }
}

impl FromStr for Subdivision {
    type Err = ParseSubdivisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseSubdivisionError::Empty);
        }

        let (body, dotted) = match s.strip_suffix('.') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let kind = body.chars().last().ok_or(ParseSubdivisionError::Malformed)?;
        let digits = &body[..body.len() - kind.len_utf8()];
        let n: u64 = digits.parse().map_err(|_| ParseSubdivisionError::Malformed)?;
        if n == 0 {
            return Err(ParseSubdivisionError::Malformed);
        }

        // (numerator, denominator) of the length in sub-beats
        let (num, den) = match kind {
            'n' => (WHOLE_NOTE, n),
            't' => (WHOLE_NOTE * 2, n * 3),
            'm' if !dotted => (WHOLE_NOTE * n, 1),
            _ => return Err(ParseSubdivisionError::Malformed),
        };
        let (num, den) = if dotted { (num * 3, den * 2) } else { (num, den) };

        if num % den != 0 {
            return Err(ParseSubdivisionError::Unrepresentable);
        }
        Self::from_sub_beats(num / den).ok_or(ParseSubdivisionError::Unrepresentable)
    }
}
