//! Per-frame driver: tempo hand-off → commands → scheduler → graph.

use std::sync::Arc;

use jr_ir::{MusicalTime, Subdivision};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use slotmap::SecondaryMap;
use thiserror::Error;

use crate::clock::{ClockError, FramePos, TransportClock};
use crate::command::{Command, EngineControl, Retired, SharedTempo};
use crate::frame::Frame;
use crate::graph::{AudioGraph, GraphError, VoiceKey, GAIN_RAMP_SECS};
use crate::scheduler::{EventCallback, EventHandle, EventScheduler};

/// Most periodic events one voice can own.
pub const MAX_EVENTS_PER_VOICE: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub tempo_bpm: f64,
    /// Lookahead between a start request and the transport's beat zero.
    pub start_latency_secs: f64,
    pub gain_ramp_secs: f32,
    /// Capacity of the host → audio command ring.
    pub command_capacity: usize,
    /// Event slots reserved up front so scheduling never reallocates.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            tempo_bpm: 90.0,
            start_latency_secs: 0.1,
            gain_ramp_secs: GAIN_RAMP_SECS,
            command_capacity: 64,
            event_capacity: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("voice {0:?} already has the maximum number of scheduled events")]
    EventLimit(VoiceKey),
}

/// Scheduled work that restarts one voice.
#[derive(Clone, Copy, Debug)]
pub struct TriggerVoice(pub VoiceKey);

impl EventCallback<AudioGraph> for TriggerVoice {
    fn fire(&mut self, beat: MusicalTime, graph: &mut AudioGraph) {
        graph.trigger(self.0, beat);
    }
}

/// Owns the transport, the scheduler and the graph, and renders frames.
pub struct Engine {
    clock: TransportClock,
    scheduler: EventScheduler<AudioGraph>,
    graph: AudioGraph,
    tempo: Arc<SharedTempo>,
    /// Last value read from `tempo`.
    published_tempo: f64,
    commands: HeapCons<Command>,
    retired: HeapProd<Retired>,
    voice_events: SecondaryMap<VoiceKey, heapless::Vec<EventHandle, MAX_EVENTS_PER_VOICE>>,
    /// Index of the next frame to render.
    frame: FramePos,
    start_latency: FramePos,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<(Self, EngineControl), ClockError> {
        let clock = TransportClock::new(config.sample_rate, config.tempo_bpm)?;
        let sample_rate = clock.sample_rate();
        let tempo = Arc::new(SharedTempo::new(clock.tempo()));
        let command_capacity = config.command_capacity.max(1);
        let (producer, commands) = HeapRb::<Command>::new(command_capacity).split();
        // Room for every queued command to be a dispose, plus token cancels
        let retire_capacity = command_capacity * (MAX_EVENTS_PER_VOICE + 1) + config.event_capacity;
        let (retired, released) = HeapRb::<Retired>::new(retire_capacity).split();

        let mut graph = AudioGraph::with_ramp(sample_rate, config.gain_ramp_secs);
        graph.set_frames_per_beat(clock.frames_per_beat());

        let engine = Self {
            published_tempo: clock.tempo(),
            clock,
            scheduler: EventScheduler::with_capacity(config.event_capacity),
            graph,
            tempo: tempo.clone(),
            commands,
            retired,
            voice_events: SecondaryMap::new(),
            frame: 0,
            start_latency: (config.start_latency_secs.max(0.0) * sample_rate as f64) as FramePos,
        };
        Ok((engine, EngineControl::new(tempo, producer, released)))
    }

    pub fn clock(&self) -> &TransportClock {
        &self.clock
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut AudioGraph {
        &mut self.graph
    }

    pub fn scheduler(&self) -> &EventScheduler<AudioGraph> {
        &self.scheduler
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    /// Index of the next frame to be rendered.
    pub fn frame_position(&self) -> FramePos {
        self.frame
    }

    /// Transport position at the next frame.
    pub fn position(&self) -> MusicalTime {
        self.clock.position(self.frame)
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn tempo(&self) -> f64 {
        self.clock.tempo()
    }

    /// Change the tempo at the current frame, for an engine driven on the
    /// caller's thread. The published tempo is left alone, so the next
    /// [`EngineControl::set_tempo`] still wins.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), ClockError> {
        self.clock.set_tempo(bpm, self.frame)?;
        self.graph.set_frames_per_beat(self.clock.frames_per_beat());
        Ok(())
    }

    /// Start the transport after the configured lookahead.
    pub fn start(&mut self) {
        self.clock.start(self.frame + self.start_latency);
    }

    pub fn stop(&mut self) {
        self.clock.stop(self.frame);
    }

    /// Trigger `voice` on every `subdivision` boundary of the transport.
    pub fn schedule_voice(&mut self, voice: VoiceKey, subdivision: Subdivision) -> Result<EventHandle, EngineError> {
        if !self.graph.contains(voice) {
            return Err(GraphError::UnknownVoice(voice).into());
        }
        if self.voice_events.get(voice).is_some_and(|h| h.is_full()) {
            return Err(EngineError::EventLimit(voice));
        }
        let handle = self.scheduler.schedule(subdivision, TriggerVoice(voice));
        match self.voice_events.entry(voice) {
            Some(entry) => {
                let _ = entry.or_default().push(handle);
            }
            None => {
                self.scheduler.cancel(handle);
                return Err(GraphError::UnknownVoice(voice).into());
            }
        }
        Ok(handle)
    }

    /// Cancel every event that triggers `voice`. Returns how many were live.
    pub fn cancel_voice_events(&mut self, voice: VoiceKey) -> usize {
        let Some(handles) = self.voice_events.remove(voice) else {
            return 0;
        };
        let mut live = 0;
        for handle in handles {
            if let Some(event) = self.scheduler.remove(handle) {
                self.retire(Retired::Event(event));
                live += 1;
            }
        }
        live
    }

    /// Cancel the voice's events, then release the voice.
    pub fn dispose_voice(&mut self, voice: VoiceKey) -> bool {
        self.cancel_voice_events(voice);
        match self.graph.dispose(voice) {
            Some(slot) => {
                self.retire(Retired::Voice(slot));
                true
            }
            None => false,
        }
    }

    /// Hand memory back to the host. The ring is sized so this only drops
    /// in place when the host has stopped sending commands for a long time.
    fn retire(&mut self, item: Retired) {
        let _ = self.retired.try_push(item);
    }

    fn retire_cancelled_events(&mut self) {
        while !self.retired.is_full() {
            match self.scheduler.take_cancelled() {
                Some(event) => self.retire(Retired::Event(event)),
                None => break,
            }
        }
    }

    fn apply_published_tempo(&mut self) {
        let bpm = self.tempo.load();
        if bpm != self.published_tempo {
            self.published_tempo = bpm;
            // Only validated values are ever published
            if self.clock.set_tempo(bpm, self.frame).is_ok() {
                self.graph.set_frames_per_beat(self.clock.frames_per_beat());
            }
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::SetGain(voice, gain) => {
                let _ = self.graph.set_gain(voice, gain);
            }
            Command::SetEnabled(voice, enabled) => {
                let _ = self.graph.set_enabled(voice, enabled);
            }
            Command::Toggle(voice) => {
                let _ = self.graph.toggle(voice);
            }
            Command::Trigger(voice) => {
                let at = self.position();
                self.graph.trigger(voice, at);
            }
            Command::Dispose(voice) => {
                self.dispose_voice(voice);
            }
        }
    }

    /// Render one output frame.
    pub fn render_frame(&mut self) -> Frame {
        self.apply_published_tempo();
        while let Some(command) = self.commands.try_pop() {
            self.apply(command);
        }

        if self.clock.is_running() {
            let now = self.clock.position(self.frame);
            self.scheduler.advance(now, &mut self.graph);
            self.retire_cancelled_events();
        }

        let out = self.graph.render();
        self.frame += 1;
        out
    }

    /// Render into `out`, one frame per slot.
    pub fn render_block(&mut self, out: &mut [Frame]) {
        for slot in out.iter_mut() {
            *slot = self.render_frame();
        }
    }
}
