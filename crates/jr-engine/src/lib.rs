//! Real-time core of the jamroom practice engine.
//!
//! A [`TransportClock`] turns output frames into beat-space time, the
//! [`EventScheduler`] fires periodic callbacks on subdivision boundaries,
//! and the [`AudioGraph`] renders the voices those callbacks trigger.
//! [`Engine`] ties the three together one frame at a time. The
//! [`PitchEstimator`] is independent of all of it and runs on the tuner
//! thread.

extern crate alloc;

mod clock;
mod command;
mod engine;
mod envelope;
mod estimator;
mod frame;
mod graph;
mod pitch_shift;
mod ramp;
pub mod scheduler;
mod voice;

pub use clock::{ClockError, FramePos, TransportClock};
pub use command::{Command, CommandError, EngineControl, Retired, SharedTempo};
pub use engine::{Engine, EngineConfig, EngineError, TriggerVoice, MAX_EVENTS_PER_VOICE};
pub use envelope::{Envelope, EnvelopePhase, EnvelopeState};
pub use estimator::{EstimatorConfig, PitchEstimate, PitchEstimator};
pub use frame::Frame;
pub use graph::{AudioGraph, GraphError, RetiredVoice, VoiceKey, GAIN_RAMP_SECS};
pub use pitch_shift::PitchShift;
pub use ramp::GainRamp;
pub use scheduler::{CancelToken, EventCallback, EventHandle, EventScheduler, RetiredEvent};
pub use voice::{ClickParams, ClickVoice, DroneVoice, LoopVoice, Voice, MAX_DRONE_NOTES};
