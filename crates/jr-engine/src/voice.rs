//! Voices: the sound sources routed through the audio graph.
//!
//! Every voice renders one mono-or-stereo frame at a time and is restarted
//! by `trigger`. Rendering never allocates.

use core::f32::consts::TAU;

use arrayvec::ArrayVec;
use jr_ir::{Note, Sample};

use crate::envelope::{Envelope, EnvelopeState};
use crate::frame::Frame;

/// Most notes a drone chord can hold.
pub const MAX_DRONE_NOTES: usize = 8;

/// Membrane-style click: a sine whose pitch falls exponentially from
/// `frequency * octaves` to `frequency` over `pitch_decay` seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClickParams {
    pub frequency: f32,
    pub octaves: f32,
    pub pitch_decay: f32,
    pub envelope: Envelope,
    /// Time between gate-on and gate-off, in beats.
    pub gate_beats: f32,
}

impl Default for ClickParams {
    fn default() -> Self {
        Self {
            frequency: 261.63,
            octaves: 10.0,
            pitch_decay: 0.008,
            envelope: Envelope::CLICK,
            // An eighth note
            gate_beats: 0.5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClickVoice {
    params: ClickParams,
    sample_rate: f32,
    env: EnvelopeState,
    phase: f32,
    freq: f32,
    /// Per-frame multiplier applied to `freq` during the sweep.
    sweep: f32,
    sweep_frames: u32,
    gate_frames: u32,
    gated: bool,
    elapsed: u32,
}

impl ClickVoice {
    pub fn new(params: ClickParams, sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        let sweep_frames = (params.pitch_decay * sr).max(1.0) as u32;
        let octaves = params.octaves.max(1.0);
        Self {
            params,
            sample_rate: sr,
            env: EnvelopeState::new(params.envelope, sample_rate),
            phase: 0.0,
            freq: params.frequency,
            sweep: octaves.powf(-1.0 / sweep_frames as f32),
            sweep_frames,
            // 120 BPM until told otherwise
            gate_frames: Self::gate_for(params.gate_beats, sr as f64 / 2.0),
            gated: false,
            elapsed: u32::MAX,
        }
    }

    fn gate_for(gate_beats: f32, frames_per_beat: f64) -> u32 {
        (gate_beats as f64 * frames_per_beat).max(1.0) as u32
    }

    /// Re-derive the gate length for a new tempo.
    pub fn set_frames_per_beat(&mut self, frames_per_beat: f64) {
        self.gate_frames = Self::gate_for(self.params.gate_beats, frames_per_beat);
    }

    pub fn gate_frames(&self) -> u32 {
        self.gate_frames
    }

    pub fn trigger(&mut self) {
        self.phase = 0.0;
        self.freq = self.params.frequency * self.params.octaves.max(1.0);
        self.elapsed = 0;
        self.gated = true;
        self.env.gate_on();
    }

    /// Current oscillator frequency.
    pub fn frequency(&self) -> f32 {
        self.freq
    }

    pub fn is_sounding(&self) -> bool {
        self.env.is_active()
    }

    pub fn render(&mut self) -> Frame {
        if !self.env.is_active() {
            return Frame::silence();
        }

        if self.elapsed < self.sweep_frames {
            self.freq *= self.sweep;
        } else {
            self.freq = self.params.frequency;
        }
        if self.gated && self.elapsed >= self.gate_frames {
            self.gated = false;
            self.env.gate_off();
        }
        self.elapsed = self.elapsed.saturating_add(1);

        let out = self.phase.sin() * self.env.next_level();
        self.phase = (self.phase + TAU * self.freq / self.sample_rate) % TAU;
        Frame::mono(out)
    }
}

#[derive(Clone, Copy, Debug)]
struct Partial {
    phase: f32,
    increment: f32,
}

/// Sustained chord of sine partials sharing one envelope.
#[derive(Clone, Debug)]
pub struct DroneVoice {
    notes: ArrayVec<Note, MAX_DRONE_NOTES>,
    partials: ArrayVec<Partial, MAX_DRONE_NOTES>,
    env: EnvelopeState,
    /// 1/n so a full chord never exceeds unity.
    scale: f32,
}

impl DroneVoice {
    /// Notes beyond `MAX_DRONE_NOTES` are ignored.
    pub fn new(notes: &[Note], envelope: Envelope, sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        let notes: ArrayVec<Note, MAX_DRONE_NOTES> = notes.iter().copied().take(MAX_DRONE_NOTES).collect();
        let partials = notes
            .iter()
            .map(|n| Partial { phase: 0.0, increment: TAU * n.frequency() as f32 / sr })
            .collect();
        let scale = if notes.is_empty() { 0.0 } else { 1.0 / notes.len() as f32 };
        Self { notes, partials, env: EnvelopeState::new(envelope, sample_rate), scale }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn trigger(&mut self) {
        self.env.gate_on();
    }

    pub fn release(&mut self) {
        self.env.gate_off();
    }

    pub fn is_sounding(&self) -> bool {
        self.env.is_active()
    }

    pub fn render(&mut self) -> Frame {
        if !self.env.is_active() {
            return Frame::silence();
        }
        let mut sum = 0.0;
        for p in self.partials.iter_mut() {
            sum += p.phase.sin();
            p.phase = (p.phase + p.increment) % TAU;
        }
        Frame::mono(sum * self.scale * self.env.next_level())
    }
}

/// Plays a decoded sample at its native rate, optionally looping.
///
/// A voice built without a sample (its asset failed to load) stays silent.
#[derive(Clone, Debug)]
pub struct LoopVoice {
    sample: Option<Sample>,
    looped: bool,
    position: f64,
    increment: f64,
    playing: bool,
}

impl LoopVoice {
    pub fn new(sample: Option<Sample>, looped: bool, output_rate: u32) -> Self {
        let increment = sample
            .as_ref()
            .map_or(1.0, |s| s.sample_rate as f64 / output_rate.max(1) as f64);
        Self { sample, looped, position: 0.0, increment, playing: false }
    }

    pub fn has_source(&self) -> bool {
        self.sample.as_ref().is_some_and(|s| !s.is_empty())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Restart from the top.
    pub fn trigger(&mut self) {
        self.position = 0.0;
        self.playing = self.has_source();
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn render(&mut self) -> Frame {
        let Some(sample) = self.sample.as_ref().filter(|_| self.playing) else {
            return Frame::silence();
        };
        let len = sample.len() as f64;
        let (left, right) = sample.data.frame_interpolated(self.position, self.looped);

        self.position += self.increment;
        if self.position >= len {
            if self.looped {
                self.position %= len;
            } else {
                self.playing = false;
            }
        }
        Frame { left, right }
    }
}

/// Any voice the graph can hold.
#[derive(Clone, Debug)]
pub enum Voice {
    Click(ClickVoice),
    Loop(LoopVoice),
    Drone(DroneVoice),
}

impl Voice {
    pub fn trigger(&mut self) {
        match self {
            Voice::Click(v) => v.trigger(),
            Voice::Loop(v) => v.trigger(),
            Voice::Drone(v) => v.trigger(),
        }
    }

    /// Only the click's gate depends on tempo.
    pub fn set_frames_per_beat(&mut self, frames_per_beat: f64) {
        if let Voice::Click(v) = self {
            v.set_frames_per_beat(frames_per_beat);
        }
    }

    pub fn render(&mut self) -> Frame {
        match self {
            Voice::Click(v) => v.render(),
            Voice::Loop(v) => v.render(),
            Voice::Drone(v) => v.render(),
        }
    }

    pub fn is_sounding(&self) -> bool {
        match self {
            Voice::Click(v) => v.is_sounding(),
            Voice::Loop(v) => v.is_playing(),
            Voice::Drone(v) => v.is_sounding(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jr_ir::SampleData;

    const SR: u32 = 48_000;

    fn ramp_sample(len: usize, sample_rate: u32) -> Sample {
        let mut s = Sample::new("ramp", sample_rate);
        s.data = SampleData::Mono((0..len).map(|i| i as f32 / len as f32).collect());
        s
    }

    #[test]
    fn click_sweeps_down_to_base() {
        let params = ClickParams::default();
        let mut click = ClickVoice::new(params, SR);
        assert_eq!(click.render(), Frame::silence());

        click.trigger();
        assert!((click.frequency() - params.frequency * params.octaves).abs() < 1.0);
        let mut peak = 0.0f32;
        for _ in 0..(SR / 50) {
            peak = peak.max(click.render().peak());
        }
        assert!(peak > 0.5);
        assert!((click.frequency() - params.frequency).abs() < 1.0);
    }

    #[test]
    fn click_decays_to_silence() {
        let mut click = ClickVoice::new(ClickParams::default(), SR);
        click.trigger();
        for _ in 0..SR {
            click.render();
        }
        assert!(!click.is_sounding());
        assert_eq!(click.render(), Frame::silence());
    }

    #[test]
    fn click_gate_is_an_eighth_note() {
        let mut click = ClickVoice::new(ClickParams::default(), SR);
        click.set_frames_per_beat(SR as f64);
        assert_eq!(click.gate_frames(), SR / 2);

        // A tempo change mid-note that puts the gate behind us closes it
        click.trigger();
        for _ in 0..1_000 {
            click.render();
        }
        click.set_frames_per_beat(100.0);
        click.render();
        assert_eq!(click.gate_frames(), 50);
        assert!(!click.gated);
    }

    #[test]
    fn drone_stays_within_unity() {
        let chord: Vec<Note> = ["C3", "G3", "E4"].iter().map(|n| n.parse().unwrap()).collect();
        let mut drone = DroneVoice::new(&chord, Envelope::DRONE, SR);
        assert_eq!(drone.notes().len(), 3);
        drone.trigger();
        let mut peak = 0.0f32;
        for _ in 0..SR {
            let f = drone.render();
            assert!(f.peak() <= 1.0);
            peak = peak.max(f.peak());
        }
        assert!(peak > 0.1);
        assert!(drone.is_sounding());
    }

    #[test]
    fn loop_wraps_when_looped() {
        let mut voice = LoopVoice::new(Some(ramp_sample(100, SR)), true, SR);
        voice.trigger();
        for _ in 0..250 {
            voice.render();
        }
        assert!(voice.is_playing());
        // 250 % 100 = 50
        assert!((voice.render().left - 0.5).abs() < 1e-6);
    }

    #[test]
    fn one_shot_stops_at_end() {
        let mut voice = LoopVoice::new(Some(ramp_sample(100, SR)), false, SR);
        voice.trigger();
        for _ in 0..100 {
            voice.render();
        }
        assert!(!voice.is_playing());
        assert_eq!(voice.render(), Frame::silence());
    }

    #[test]
    fn loop_plays_at_native_rate() {
        // A 24 kHz sample at 48 kHz output advances half a frame per output frame
        let mut voice = LoopVoice::new(Some(ramp_sample(100, SR / 2)), true, SR);
        voice.trigger();
        for _ in 0..20 {
            voice.render();
        }
        assert!((voice.render().left - 0.1).abs() < 1e-6);
    }

    #[test]
    fn missing_source_is_silent() {
        let mut voice = LoopVoice::new(None, true, SR);
        voice.trigger();
        assert!(!voice.has_source());
        assert!(!voice.is_playing());
        assert_eq!(voice.render(), Frame::silence());
    }
}
