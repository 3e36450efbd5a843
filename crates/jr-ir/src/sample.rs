//! Decoded PCM backing a loop voice.

use alloc::vec::Vec;
use arrayvec::ArrayString;

/// A decoded sample, normalized to f32 in -1.0..=1.0.
#[derive(Clone, Debug, Default)]
pub struct Sample {
    /// Sample name (truncated to fit)
    pub name: ArrayString<32>,
    /// Audio data
    pub data: SampleData,
    /// Native sample rate in Hz
    pub sample_rate: u32,
}

impl Sample {
    /// Create a new empty sample.
    pub fn new(name: &str, sample_rate: u32) -> Self {
        let mut sample = Self {
            sample_rate,
            ..Self::default()
        };
        for c in name.chars() {
            if sample.name.try_push(c).is_err() {
                break;
            }
        }
        sample
    }

    /// Length in frames.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length in seconds at the native rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }
}

/// Planar sample storage.
#[derive(Clone, Debug)]
pub enum SampleData {
    Mono(Vec<f32>),
    Stereo(Vec<f32>, Vec<f32>),
}

impl Default for SampleData {
    fn default() -> Self {
        SampleData::Mono(Vec::new())
    }
}

impl SampleData {
    pub fn len(&self) -> usize {
        match self {
            SampleData::Mono(v) => v.len(),
            SampleData::Stereo(l, _) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_channels(&self) -> u16 {
        match self {
            SampleData::Mono(_) => 1,
            SampleData::Stereo(_, _) => 2,
        }
    }

    /// Stereo pair at an integer frame. Out-of-range reads are silent.
    pub fn frame(&self, pos: usize) -> (f32, f32) {
        match self {
            SampleData::Mono(v) => {
                let s = v.get(pos).copied().unwrap_or(0.0);
                (s, s)
            }
            SampleData::Stereo(l, r) => (
                l.get(pos).copied().unwrap_or(0.0),
                r.get(pos).copied().unwrap_or(0.0),
            ),
        }
    }

    /// Linearly interpolated stereo pair at a fractional frame position.
    ///
    /// When `wrap` is set the frame after the last one is frame 0, so a
    /// looped sample has no click at the seam.
    pub fn frame_interpolated(&self, pos: f64, wrap: bool) -> (f32, f32) {
        let len = self.len();
        if len == 0 || pos < 0.0 {
            return (0.0, 0.0);
        }
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let next = if wrap && idx + 1 >= len { 0 } else { idx + 1 };

        let (l0, r0) = self.frame(idx);
        let (l1, r1) = self.frame(next);
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }
}
