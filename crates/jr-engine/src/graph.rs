//! Voice graph: voice → optional pitch shift → gain → mix bus.
//!
//! Each voice owns its whole chain, so disposing one voice never touches
//! another. The graph is rendered one frame at a time by the engine and
//! every rendered frame is both the audible output and what the export
//! tap sees.

use core::fmt::Display;

use jr_ir::{MusicalTime, Note, Sample};
use slotmap::SlotMap;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::frame::Frame;
use crate::pitch_shift::PitchShift;
use crate::ramp::GainRamp;
use crate::voice::{ClickParams, ClickVoice, DroneVoice, LoopVoice, Voice};

slotmap::new_key_type! {
    /// Generational handle to a voice in the graph.
    pub struct VoiceKey;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown voice {0:?}")]
    UnknownVoice(VoiceKey),
}

/// Default time for a gain change to complete.
pub const GAIN_RAMP_SECS: f32 = 0.1;

struct VoiceSlot {
    voice: Voice,
    pitch_shift: Option<PitchShift>,
    gain: GainRamp,
    /// Routed to the mix bus.
    connected: bool,
    /// Muted voices keep running but contribute nothing.
    enabled: bool,
    last_trigger: Option<MusicalTime>,
}

/// A voice taken out of the graph together with its chain. Dropping it
/// frees the voice's buffers.
pub struct RetiredVoice(VoiceSlot);

impl RetiredVoice {
    pub fn voice(&self) -> &Voice {
        &self.0.voice
    }
}

pub struct AudioGraph {
    voices: SlotMap<VoiceKey, VoiceSlot>,
    sample_rate: u32,
    ramp_secs: f32,
    /// Transport tempo in frames; click gates are measured in beats.
    frames_per_beat: f64,
}

impl AudioGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_ramp(sample_rate, GAIN_RAMP_SECS)
    }

    pub fn with_ramp(sample_rate: u32, ramp_secs: f32) -> Self {
        let sample_rate = sample_rate.max(1);
        Self {
            voices: SlotMap::with_key(),
            sample_rate,
            ramp_secs,
            // 120 BPM until the engine says otherwise
            frames_per_beat: sample_rate as f64 / 2.0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn frames_per_beat(&self) -> f64 {
        self.frames_per_beat
    }

    /// Follow a tempo change. Tempo-relative voices pick it up at once.
    pub fn set_frames_per_beat(&mut self, frames_per_beat: f64) {
        if !(frames_per_beat > 0.0) || frames_per_beat == self.frames_per_beat {
            return;
        }
        self.frames_per_beat = frames_per_beat;
        for (_, slot) in self.voices.iter_mut() {
            slot.voice.set_frames_per_beat(frames_per_beat);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn contains(&self, key: VoiceKey) -> bool {
        self.voices.contains_key(key)
    }

    fn insert(&mut self, voice: Voice) -> VoiceKey {
        self.voices.insert(VoiceSlot {
            voice,
            pitch_shift: None,
            gain: GainRamp::new(1.0, self.ramp_secs, self.sample_rate),
            connected: false,
            enabled: true,
            last_trigger: None,
        })
    }

    /// Add a sample player. A failed load still yields a voice, one that
    /// renders silence.
    pub fn create_loop_voice<E: Display>(&mut self, source: Result<Sample, E>, looped: bool) -> VoiceKey {
        let sample = match source {
            Ok(sample) => {
                tracing::debug!(
                    name = %sample.name,
                    frames = sample.len(),
                    rate = sample.sample_rate,
                    "loaded loop sample"
                );
                Some(sample)
            }
            Err(e) => {
                tracing::warn!("loop asset failed to load, voice will be silent: {}", e);
                None
            }
        };
        self.insert(Voice::Loop(LoopVoice::new(sample, looped, self.sample_rate)))
    }

    pub fn create_click_voice(&mut self, params: ClickParams) -> VoiceKey {
        let mut click = ClickVoice::new(params, self.sample_rate);
        click.set_frames_per_beat(self.frames_per_beat);
        self.insert(Voice::Click(click))
    }

    pub fn create_drone_voice(&mut self, notes: &[Note], envelope: Envelope) -> VoiceKey {
        self.insert(Voice::Drone(DroneVoice::new(notes, envelope, self.sample_rate)))
    }

    fn slot_mut(&mut self, key: VoiceKey) -> Result<&mut VoiceSlot, GraphError> {
        self.voices.get_mut(key).ok_or(GraphError::UnknownVoice(key))
    }

    /// Route a voice to the mix bus through a pitch shift of
    /// `pitch_shift_semitones` (none when zero) and a gain stage starting
    /// at `gain`. Reconnecting replaces the previous routing.
    pub fn connect(&mut self, key: VoiceKey, pitch_shift_semitones: f32, gain: f32) -> Result<(), GraphError> {
        let sample_rate = self.sample_rate;
        let slot = self.slot_mut(key)?;
        slot.pitch_shift = match slot.pitch_shift.take() {
            _ if pitch_shift_semitones == 0.0 => None,
            Some(mut shift) => {
                shift.set_semitones(pitch_shift_semitones);
                Some(shift)
            }
            None => Some(PitchShift::new(pitch_shift_semitones, sample_rate)),
        };
        slot.gain.set_immediate(gain);
        slot.connected = true;
        Ok(())
    }

    /// (Re)start a voice. Returns false for a disposed or unknown voice.
    pub fn trigger(&mut self, key: VoiceKey, at: MusicalTime) -> bool {
        match self.voices.get_mut(key) {
            Some(slot) => {
                slot.voice.trigger();
                slot.last_trigger = Some(at);
                true
            }
            None => false,
        }
    }

    /// Beat of the most recent trigger.
    pub fn last_trigger(&self, key: VoiceKey) -> Option<MusicalTime> {
        self.voices.get(key).and_then(|s| s.last_trigger)
    }

    /// Ramp the voice's gain to `value` over the graph's ramp time.
    pub fn set_gain(&mut self, key: VoiceKey, value: f32) -> Result<(), GraphError> {
        self.slot_mut(key)?.gain.set_target(value);
        Ok(())
    }

    /// Gain currently applied (mid-ramp values included).
    pub fn current_gain(&self, key: VoiceKey) -> Option<f32> {
        self.voices.get(key).map(|s| s.gain.current())
    }

    pub fn set_enabled(&mut self, key: VoiceKey, enabled: bool) -> Result<(), GraphError> {
        self.slot_mut(key)?.enabled = enabled;
        Ok(())
    }

    /// Flip mute; returns the new enabled state.
    pub fn toggle(&mut self, key: VoiceKey) -> Result<bool, GraphError> {
        let slot = self.slot_mut(key)?;
        slot.enabled = !slot.enabled;
        Ok(slot.enabled)
    }

    pub fn is_enabled(&self, key: VoiceKey) -> Option<bool> {
        self.voices.get(key).map(|s| s.enabled)
    }

    pub fn voice(&self, key: VoiceKey) -> Option<&Voice> {
        self.voices.get(key).map(|s| &s.voice)
    }

    /// Take a voice and its chain out of the graph. Later operations on
    /// `key` are no-ops. The voice is freed when the returned value drops.
    pub fn dispose(&mut self, key: VoiceKey) -> Option<RetiredVoice> {
        self.voices.remove(key).map(RetiredVoice)
    }

    /// Render one frame of the mix bus.
    pub fn render(&mut self) -> Frame {
        let mut bus = Frame::silence();
        for (_, slot) in self.voices.iter_mut() {
            let mut frame = slot.voice.render();
            if !slot.connected {
                continue;
            }
            if let Some(shift) = slot.pitch_shift.as_mut() {
                frame = shift.process(frame);
            }
            let gain = slot.gain.next_gain();
            if slot.enabled {
                bus.mix(frame.scaled(gain));
            }
        }
        bus
    }
}
