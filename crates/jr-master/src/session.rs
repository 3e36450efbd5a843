//! What a practice session contains and how it is wired.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use jr_engine::{ClickParams, Engine, EngineConfig, EngineControl, Envelope, EstimatorConfig, VoiceKey};
use jr_ir::{Note, Sample, Subdivision};

use crate::ControlError;

/// The three voices of a session, as the host names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoiceId {
    Click,
    Loop,
    Drone,
}

impl VoiceId {
    pub const ALL: [VoiceId; 3] = [VoiceId::Click, VoiceId::Loop, VoiceId::Drone];

    pub(crate) fn index(self) -> usize {
        match self {
            VoiceId::Click => 0,
            VoiceId::Loop => 1,
            VoiceId::Drone => 2,
        }
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoiceId::Click => "click",
            VoiceId::Loop => "loop",
            VoiceId::Drone => "drone",
        })
    }
}

impl FromStr for VoiceId {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "click" => Ok(VoiceId::Click),
            "loop" => Ok(VoiceId::Loop),
            "drone" => Ok(VoiceId::Drone),
            _ => Err(ControlError::UnknownVoice(s.to_string())),
        }
    }
}

/// Where the loop voice gets its audio.
#[derive(Clone, Debug, Default)]
pub enum LoopSource {
    /// No loop configured; the voice exists but stays silent.
    #[default]
    None,
    /// A WAV file decoded when the session is built.
    File(PathBuf),
    Sample(Sample),
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub engine: EngineConfig,

    pub click: ClickParams,
    pub click_every: Subdivision,
    pub click_gain: f32,

    pub loop_source: LoopSource,
    pub loop_gain: f32,
    pub loop_pitch_shift: f32,

    pub drone_notes: Vec<Note>,
    pub drone_envelope: Envelope,
    pub drone_every: Subdivision,
    pub drone_gain: f32,

    pub tuner: EstimatorConfig,
    /// Tuner analysis rate in Hz.
    pub poll_hz: f32,
    /// Microphone samples buffered between tuner ticks.
    pub mic_buffer: usize,
    /// Seconds of mixed output the export tap holds before dropping.
    pub tap_secs: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            click: ClickParams::default(),
            click_every: Subdivision::QUARTER,
            click_gain: 0.8,
            loop_source: LoopSource::None,
            loop_gain: 0.6,
            loop_pitch_shift: 0.0,
            // C3
            drone_notes: vec![Note::from_midi(48)],
            drone_envelope: Envelope::DRONE,
            drone_every: Subdivision::MEASURE,
            drone_gain: 0.4,
            tuner: EstimatorConfig::default(),
            poll_hz: 60.0,
            mic_buffer: 16_384,
            tap_secs: 10.0,
        }
    }
}

impl SessionConfig {
    pub(crate) fn tap_capacity(&self) -> usize {
        ((self.tap_secs.max(0.0) * self.engine.sample_rate as f32) as usize).max(1)
    }
}

/// Graph keys for the session's voices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Voices([VoiceKey; 3]);

impl Voices {
    pub fn key(&self, id: VoiceId) -> VoiceKey {
        self.0[id.index()]
    }
}

/// Build an engine holding the session's voices.
///
/// The click and drone are scheduled on their subdivisions and start with
/// the transport. The loop and the drone also sound straight away.
pub(crate) fn build_engine(config: &SessionConfig) -> Result<(Engine, EngineControl, Voices), ControlError> {
    let (mut engine, control) = Engine::new(config.engine)?;
    let now = engine.position();

    let graph = engine.graph_mut();
    let click = graph.create_click_voice(config.click);
    graph.connect(click, 0.0, config.click_gain)?;

    let looped = match &config.loop_source {
        LoopSource::None => graph.create_loop_voice::<&str>(Err("no loop asset configured"), true),
        LoopSource::File(path) => graph.create_loop_voice(jr_formats::load_wav_file(path), true),
        LoopSource::Sample(sample) => graph.create_loop_voice::<&str>(Ok(sample.clone()), true),
    };
    graph.connect(looped, config.loop_pitch_shift, config.loop_gain)?;
    graph.trigger(looped, now);

    let drone = graph.create_drone_voice(&config.drone_notes, config.drone_envelope);
    graph.connect(drone, 0.0, config.drone_gain)?;
    graph.trigger(drone, now);

    engine.schedule_voice(click, config.click_every)?;
    engine.schedule_voice(drone, config.drone_every)?;

    tracing::debug!(
        bpm = engine.tempo(),
        rate = engine.sample_rate(),
        drone = config.drone_notes.len(),
        "built practice session"
    );
    Ok((engine, control, Voices([click, looped, drone])))
}
