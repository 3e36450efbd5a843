//! Equal-tempered note naming and frequency mapping.
//!
//! Notes use MIDI numbering (A4 = 69 = 440 Hz). The tuner path maps a
//! detected frequency to the nearest note plus a signed cents deviation;
//! the drone path goes the other way, from a note name to a frequency.

use core::fmt;
use core::str::FromStr;
use thiserror::Error;

/// Reference pitch for A4 in Hz.
pub const A4_HZ: f64 = 440.0;

/// MIDI number of A4.
pub const A4_MIDI: i32 = 69;

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// An equal-tempered note, identified by its MIDI number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Note {
    pub midi: i32,
}

impl Note {
    pub const fn from_midi(midi: i32) -> Self {
        Self { midi }
    }

    /// Index into the 12-entry pitch-class table (C = 0).
    pub const fn pitch_class(self) -> usize {
        self.midi.rem_euclid(12) as usize
    }

    /// Pitch-class name, sharps only.
    pub fn name(self) -> &'static str {
        PITCH_CLASS_NAMES[self.pitch_class()]
    }

    /// Scientific octave number (C4 = 60).
    pub const fn octave(self) -> i32 {
        self.midi.div_euclid(12) - 1
    }

    /// Equal-tempered frequency in Hz.
    pub fn frequency(self) -> f64 {
        A4_HZ * libm::exp2((self.midi - A4_MIDI) as f64 / 12.0)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.octave())
    }
}

/// Error returned when a note name cannot be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ParseNoteError {
    #[error("note name is empty")]
    Empty,
    #[error("unknown pitch letter")]
    UnknownLetter,
    #[error("missing or malformed octave number")]
    BadOctave,
}

impl FromStr for Note {
    type Err = ParseNoteError;

    /// Accepts `C3`, `A#4`, `Bb2`, `c-1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().ok_or(ParseNoteError::Empty)?;
        let base = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(ParseNoteError::UnknownLetter),
        };

        let rest = chars.as_str();
        let (accidental, octave) = if let Some(r) = rest.strip_prefix('#') {
            (1, r)
        } else if let Some(r) = rest.strip_prefix('b') {
            (-1, r)
        } else {
            (0, rest)
        };
        let octave: i32 = octave.parse().map_err(|_| ParseNoteError::BadOctave)?;

        Ok(Self::from_midi((octave + 1) * 12 + base + accidental))
    }
}

/// What the tuner display shows for one analysis tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TunerReading {
    /// Silence, noise, or no capture feed.
    NoSignal,
    /// Nearest note and deviation in cents (-50..=50).
    Pitched { note: Note, cents: i8, frequency_hz: f32 },
}

impl TunerReading {
    pub fn note(&self) -> Option<Note> {
        match self {
            TunerReading::NoSignal => None,
            TunerReading::Pitched { note, .. } => Some(*note),
        }
    }

    pub fn cents(&self) -> Option<i8> {
        match self {
            TunerReading::NoSignal => None,
            TunerReading::Pitched { cents, .. } => Some(*cents),
        }
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, TunerReading::Pitched { .. })
    }
}

impl fmt::Display for TunerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunerReading::NoSignal => f.write_str("-"),
            TunerReading::Pitched { note, cents, .. } => write!(f, "{} {:+}c", note, cents),
        }
    }
}

/// Round half up, matching the usual display convention for cents.
fn round_half_up(x: f64) -> f64 {
    libm::floor(x + 0.5)
}

/// Map a frequency to the nearest note and its cents deviation.
///
/// Zero, negative and non-finite inputs are "no signal".
pub fn map_frequency(frequency_hz: f32) -> TunerReading {
    let f = frequency_hz as f64;
    if !(f > 0.0) || !f.is_finite() {
        return TunerReading::NoSignal;
    }

    let semitones = 12.0 * libm::log2(f / A4_HZ);
    let nearest = round_half_up(semitones);
    let cents = round_half_up((semitones - nearest) * 100.0).clamp(-50.0, 50.0);

    TunerReading::Pitched {
        note: Note::from_midi(nearest as i32 + A4_MIDI),
        cents: cents as i8,
        frequency_hz,
    }
}

/// Map an optional estimate; `None` (unvoiced) is "no signal".
pub fn map_estimate(frequency_hz: Option<f32>) -> TunerReading {
    frequency_hz.map_or(TunerReading::NoSignal, map_frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use approx::assert_relative_eq;

    #[test]
    fn a440_is_a4_in_tune() {
        let r = map_frequency(440.0);
        assert_eq!(r.note(), Some(Note::from_midi(69)));
        assert_eq!(r.cents(), Some(0));
        assert_eq!(r.note().unwrap().to_string(), "A4");
    }

    #[test]
    fn a_sharp_4_within_one_cent() {
        let r = map_frequency(466.16);
        assert_eq!(r.note().unwrap().to_string(), "A#4");
        assert!(r.cents().unwrap().abs() <= 1);
    }

    #[test]
    fn zero_and_unvoiced_are_no_signal() {
        assert_eq!(map_frequency(0.0), TunerReading::NoSignal);
        assert_eq!(map_frequency(-12.0), TunerReading::NoSignal);
        assert_eq!(map_frequency(f32::NAN), TunerReading::NoSignal);
        assert_eq!(map_estimate(None), TunerReading::NoSignal);
    }

    #[test]
    fn sharp_and_flat_cents_are_signed() {
        // 20 cents sharp of A4
        let sharp = map_frequency((440.0 * libm::exp2(0.2 / 12.0)) as f32);
        assert_eq!(sharp.note(), Some(Note::from_midi(69)));
        assert_eq!(sharp.cents(), Some(20));

        let flat = map_frequency((440.0 * libm::exp2(-0.3 / 12.0)) as f32);
        assert_eq!(flat.note(), Some(Note::from_midi(69)));
        assert_eq!(flat.cents(), Some(-30));
    }

    #[test]
    fn quarter_tone_rounds_up_to_next_note() {
        let r = map_frequency((440.0 * libm::exp2(0.5 / 12.0)) as f32);
        let note = r.note().unwrap();
        // Float noise may land either side of the half-way point
        assert!(note.midi == 69 || note.midi == 70);
        assert_eq!(r.cents().unwrap().abs(), 50);
    }

    #[test]
    fn octave_boundaries() {
        assert_eq!(Note::from_midi(60).to_string(), "C4");
        assert_eq!(Note::from_midi(59).to_string(), "B3");
        assert_eq!(Note::from_midi(0).to_string(), "C-1");
        assert_eq!(Note::from_midi(-1).to_string(), "B-2");
    }

    #[test]
    fn mapping_is_idempotent() {
        for f in [82.41f32, 110.0, 196.0, 329.63, 1046.5] {
            assert_eq!(map_frequency(f), map_frequency(f));
        }
    }

    #[test]
    fn parses_note_names() {
        assert_eq!("C3".parse::<Note>(), Ok(Note::from_midi(48)));
        assert_eq!("A#4".parse::<Note>(), Ok(Note::from_midi(70)));
        assert_eq!("Bb4".parse::<Note>(), Ok(Note::from_midi(70)));
        assert_eq!("c-1".parse::<Note>(), Ok(Note::from_midi(0)));
        assert_eq!("H2".parse::<Note>(), Err(ParseNoteError::UnknownLetter));
        assert_eq!("C".parse::<Note>(), Err(ParseNoteError::BadOctave));
        assert_eq!("".parse::<Note>(), Err(ParseNoteError::Empty));
    }

    #[test]
    fn note_frequency_round_trips_through_mapper() {
        let c3 = Note::from_midi(48);
        assert_relative_eq!(c3.frequency(), 130.8128, epsilon = 1e-3);
        assert_eq!(map_frequency(c3.frequency() as f32).note(), Some(c3));
    }
}
