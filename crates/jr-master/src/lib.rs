//! Headless practice-session controller for jamroom.
//!
//! Owns a session's engine and exposes the host surface: tempo, transport,
//! per-voice gain and mute, the tuner feed and the export tap. The engine
//! renders either on a cpal output device or offline on the caller's
//! thread; the host API is the same in both cases.

mod session;
mod tuner;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use jr_audio::{AudioOutput, CpalInput, CpalOutput};
use jr_engine::{Engine, EngineControl};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use thiserror::Error;

use crate::tuner::{ReadingsFeed, SharedReading};

// Re-export common types so callers don't need jr-ir/jr-engine directly.
pub use jr_audio::AudioError;
pub use jr_engine::{ClickParams, ClockError, CommandError, EngineConfig, EngineError, EstimatorConfig, Frame};
pub use jr_formats::{frames_to_wav, load_wav_file, write_wav, FormatError};
pub use jr_ir::{MusicalTime, Note, Subdivision, TunerReading};
pub use session::{LoopSource, SessionConfig, VoiceId, Voices};
pub use tuner::{analyze, TunerWorker};

/// Slowest tempo the host surface accepts; slower requests are clamped.
pub const MIN_TEMPO_BPM: f64 = 40.0;
/// Fastest tempo the host surface accepts; faster requests are clamped.
pub const MAX_TEMPO_BPM: f64 = 200.0;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("tempo must be a positive number of BPM, got {0}")]
    InvalidTempo(f64),
    #[error("gain must be a finite number, got {0}")]
    InvalidGain(f32),
    #[error("unknown voice `{0}`")]
    UnknownVoice(String),
    #[error("session is playing on an audio device")]
    Busy,
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Graph(#[from] jr_engine::GraphError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// The engine plus its export tap.
struct Rig {
    engine: Engine,
    tap: HeapProd<Frame>,
}

impl Rig {
    fn render_frame(&mut self) -> Frame {
        let frame = self.engine.render_frame();
        // A full tap drops frames instead of blocking the render
        let _ = self.tap.try_push(frame);
        frame
    }
}

struct PlaybackHandle {
    stop_signal: Arc<AtomicBool>,
    frame: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<Rig>>,
}

struct TunerHandle {
    stop_signal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    /// Present when the host pushes samples instead of a microphone.
    feed: Option<HeapProd<f32>>,
}

/// Headless practice controller. Owns a session and manages playback.
pub struct Controller {
    config: SessionConfig,
    control: EngineControl,
    voices: Voices,
    enabled: [bool; 3],
    /// The engine while it renders on this thread.
    rig: Option<Rig>,
    playback: Option<PlaybackHandle>,
    tap: HeapCons<Frame>,
    reading: Arc<SharedReading>,
    readings_tx: Sender<TunerReading>,
    readings_rx: Receiver<TunerReading>,
    tuner: Option<TunerHandle>,
}

impl Controller {
    pub fn new(config: SessionConfig) -> Result<Self, ControlError> {
        let (engine, control, voices) = session::build_engine(&config)?;
        let (tap_prod, tap) = HeapRb::<Frame>::new(config.tap_capacity()).split();
        // Holds only the newest reading; the tuner replaces it every tick
        let (readings_tx, readings_rx) = crossbeam_channel::bounded(1);

        Ok(Self {
            config,
            control,
            voices,
            enabled: [true; 3],
            rig: Some(Rig { engine, tap: tap_prod }),
            playback: None,
            tap,
            reading: Arc::new(SharedReading::new()),
            readings_tx,
            readings_rx,
            tuner: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.engine.sample_rate
    }

    pub fn voices(&self) -> &Voices {
        &self.voices
    }

    // --- Host control surface ---

    /// Set the tempo. Non-positive and non-finite values are rejected;
    /// anything else is clamped to [`MIN_TEMPO_BPM`]..=[`MAX_TEMPO_BPM`].
    /// Returns the tempo actually applied.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<f64, ControlError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(ControlError::InvalidTempo(bpm));
        }
        let clamped = bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM);
        if clamped != bpm {
            tracing::debug!(requested = bpm, applied = clamped, "tempo clamped");
        }
        self.control.set_tempo(clamped)?;
        Ok(clamped)
    }

    pub fn tempo(&self) -> f64 {
        self.control.tempo()
    }

    pub fn start_transport(&mut self) -> Result<(), ControlError> {
        self.control.start()?;
        Ok(())
    }

    pub fn stop_transport(&mut self) -> Result<(), ControlError> {
        self.control.stop()?;
        Ok(())
    }

    /// Ramp a voice to `gain` (clamped to 0..=1). NaN and infinities are
    /// rejected.
    pub fn set_voice_gain(&mut self, voice: VoiceId, gain: f32) -> Result<(), ControlError> {
        if !gain.is_finite() {
            return Err(ControlError::InvalidGain(gain));
        }
        self.control.set_gain(self.voices.key(voice), gain.clamp(0.0, 1.0))?;
        Ok(())
    }

    /// Mute or unmute a voice; returns the new enabled state.
    pub fn toggle_voice(&mut self, voice: VoiceId) -> Result<bool, ControlError> {
        self.control.toggle(self.voices.key(voice))?;
        let enabled = &mut self.enabled[voice.index()];
        *enabled = !*enabled;
        Ok(*enabled)
    }

    pub fn is_voice_enabled(&self, voice: VoiceId) -> bool {
        self.enabled[voice.index()]
    }

    /// Frames rendered so far. While playing on a device this trails the
    /// audio thread by up to 10 ms.
    pub fn frame_position(&self) -> u64 {
        match (&self.rig, &self.playback) {
            (Some(rig), _) => rig.engine.frame_position(),
            (None, Some(pb)) => pb.frame.load(Ordering::Relaxed),
            (None, None) => 0,
        }
    }

    // --- Export tap ---

    /// Take every mixed frame rendered since the last drain.
    pub fn drain_tap(&mut self) -> Vec<Frame> {
        let mut frames = vec![Frame::silence(); self.tap.occupied_len()];
        let n = self.tap.pop_slice(&mut frames);
        frames.truncate(n);
        frames
    }

    // --- Offline rendering ---

    /// Render `count` frames on this thread. Fails while playing on a
    /// device.
    pub fn render_frames(&mut self, count: usize) -> Result<Vec<Frame>, ControlError> {
        let rig = self.rig.as_mut().ok_or(ControlError::Busy)?;
        Ok((0..count).map(|_| rig.render_frame()).collect())
    }

    pub fn render_seconds(&mut self, seconds: f64) -> Result<Vec<Frame>, ControlError> {
        let count = (seconds.max(0.0) * self.sample_rate() as f64) as usize;
        self.render_frames(count)
    }

    // --- Real-time playback ---

    /// Hand the engine to an audio thread feeding the default output.
    pub fn play(&mut self) {
        let Some(rig) = self.rig.take() else {
            return;
        };

        let stop_signal = Arc::new(AtomicBool::new(false));
        let frame = Arc::new(AtomicU64::new(rig.engine.frame_position()));
        let finished = Arc::new(AtomicBool::new(false));

        let stop = stop_signal.clone();
        let pos = frame.clone();
        let done = finished.clone();

        let thread = std::thread::spawn(move || audio_thread(rig, stop, pos, done));

        self.playback = Some(PlaybackHandle { stop_signal, frame, finished, thread: Some(thread) });
    }

    /// Stop the audio thread and take the engine back.
    pub fn stop(&mut self) {
        if let Some(mut pb) = self.playback.take() {
            pb.stop_signal.store(true, Ordering::Relaxed);
            if let Some(handle) = pb.thread.take() {
                match handle.join() {
                    Ok(rig) => self.rig = Some(rig),
                    Err(_) => tracing::error!("audio thread panicked; session lost"),
                }
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| !p.finished.load(Ordering::Relaxed))
    }

    /// True once the audio thread has exited on its own, e.g. when no
    /// output device could be opened.
    pub fn is_finished(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| p.finished.load(Ordering::Relaxed))
    }

    // --- Tuner ---

    /// Latest tuner reading. "No signal" until a tuner feed is running.
    pub fn tuner_reading(&self) -> TunerReading {
        self.reading.load()
    }

    /// Subscribe to readings as they are produced, one per poll tick.
    /// The queue only ever holds the newest reading, so a late or slow
    /// subscriber skips to the current one. Subscribers share the queue,
    /// so each reading goes to one of them.
    pub fn readings(&self) -> Receiver<TunerReading> {
        self.readings_rx.clone()
    }

    /// Run the tuner on the default microphone. Returns the capture rate.
    ///
    /// Without a microphone the tuner stays at "no signal".
    pub fn start_microphone(&mut self) -> Result<u32, ControlError> {
        self.stop_tuner();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let capacity = self.config.mic_buffer;
        let estimator = self.config.tuner;
        let (shared, readings, stop_signal, period) = self.tuner_parts();
        let stop = stop_signal.clone();

        let thread = std::thread::spawn(move || {
            let (input, source) = match CpalInput::open(capacity) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(input.sample_rate()));
            let worker = TunerWorker::new(source, input.sample_rate(), estimator);
            tuner::run(worker, shared, readings, stop, period);
            drop(input);
        });

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                self.tuner = Some(TunerHandle { stop_signal, thread: Some(thread), feed: None });
                Ok(rate)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                tracing::warn!("tuner has no input: {}", e);
                Err(e.into())
            }
            Err(_) => {
                let _ = thread.join();
                tracing::warn!("tuner has no input: microphone thread exited");
                Err(AudioError::MicrophoneUnavailable.into())
            }
        }
    }

    /// Run the tuner on samples the host supplies through
    /// [`push_mic_samples`](Self::push_mic_samples).
    pub fn attach_mic_feed(&mut self, sample_rate: u32) {
        self.stop_tuner();

        let (feed, source) = HeapRb::<f32>::new(self.config.mic_buffer.max(1)).split();
        let worker = TunerWorker::new(source, sample_rate, self.config.tuner);
        let (shared, readings, stop_signal, period) = self.tuner_parts();
        let stop = stop_signal.clone();
        let thread = std::thread::spawn(move || tuner::run(worker, shared, readings, stop, period));

        self.tuner = Some(TunerHandle { stop_signal, thread: Some(thread), feed: Some(feed) });
    }

    /// Push mono capture samples to an attached feed. Returns how many were
    /// accepted; zero when no feed is attached or the feed is full.
    pub fn push_mic_samples(&mut self, samples: &[f32]) -> usize {
        self.tuner
            .as_mut()
            .and_then(|t| t.feed.as_mut())
            .map_or(0, |feed| feed.push_slice(samples))
    }

    pub fn stop_tuner(&mut self) {
        if let Some(mut tuner) = self.tuner.take() {
            tuner.stop_signal.store(true, Ordering::Relaxed);
            if let Some(handle) = tuner.thread.take() {
                let _ = handle.join();
            }
        }
        self.reading.store(TunerReading::NoSignal);
    }

    fn tuner_parts(&self) -> (Arc<SharedReading>, ReadingsFeed, Arc<AtomicBool>, Duration) {
        let period = Duration::from_secs_f32(1.0 / self.config.poll_hz.max(1.0));
        let feed = ReadingsFeed::new(self.readings_tx.clone(), self.readings_rx.clone());
        (self.reading.clone(), feed, Arc::new(AtomicBool::new(false)), period)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
        self.stop_tuner();
    }
}

fn audio_thread(mut rig: Rig, stop_signal: Arc<AtomicBool>, position: Arc<AtomicU64>, finished: Arc<AtomicBool>) -> Rig {
    let sample_rate = rig.engine.sample_rate();
    let (mut output, consumer) = match CpalOutput::new(sample_rate) {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!("audio output unavailable: {}", e);
            finished.store(true, Ordering::Relaxed);
            return rig;
        }
    };

    if let Err(e) = output.build_stream(consumer) {
        tracing::error!("audio output stream failed: {}", e);
        finished.store(true, Ordering::Relaxed);
        return rig;
    }
    let _ = output.start();

    let report_interval = (sample_rate / 100).max(1) as u64;
    let mut frame_count: u64 = 0;

    while !stop_signal.load(Ordering::Relaxed) {
        #[cfg(feature = "alloc_check")]
        let frame = assert_no_alloc::assert_no_alloc(|| rig.render_frame());
        #[cfg(not(feature = "alloc_check"))]
        let frame = rig.render_frame();

        output.write_spin(frame);
        frame_count += 1;
        if frame_count % report_interval == 0 {
            position.store(rig.engine.frame_position(), Ordering::Relaxed);
        }
    }

    let _ = output.stop();
    finished.store(true, Ordering::Relaxed);
    rig
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::TAU;
    use std::time::Instant;

    const SR: u32 = 48_000;

    fn session() -> Controller {
        let config = SessionConfig {
            engine: EngineConfig { sample_rate: SR, start_latency_secs: 0.0, ..Default::default() },
            tap_secs: 1.0,
            ..Default::default()
        };
        Controller::new(config).unwrap()
    }

    #[test]
    fn tempo_rejects_and_clamps() {
        let mut ctrl = session();
        assert_eq!(ctrl.tempo(), 90.0);
        assert!(matches!(ctrl.set_tempo(0.0), Err(ControlError::InvalidTempo(_))));
        assert!(matches!(ctrl.set_tempo(-12.0), Err(ControlError::InvalidTempo(_))));
        assert!(matches!(ctrl.set_tempo(f64::NAN), Err(ControlError::InvalidTempo(_))));
        assert_eq!(ctrl.tempo(), 90.0);

        assert_eq!(ctrl.set_tempo(20.0).unwrap(), MIN_TEMPO_BPM);
        assert_eq!(ctrl.set_tempo(300.0).unwrap(), MAX_TEMPO_BPM);
        assert_eq!(ctrl.set_tempo(132.0).unwrap(), 132.0);
        assert_eq!(ctrl.tempo(), 132.0);
    }

    #[test]
    fn published_tempo_reaches_the_engine() {
        let mut ctrl = session();
        ctrl.set_tempo(120.0).unwrap();
        ctrl.render_frames(1).unwrap();
        assert_eq!(ctrl.rig.as_ref().unwrap().engine.tempo(), 120.0);
    }

    #[test]
    fn transport_commands_apply_on_render() {
        let mut ctrl = session();
        ctrl.start_transport().unwrap();
        ctrl.render_frames(1).unwrap();
        assert!(ctrl.rig.as_ref().unwrap().engine.is_running());

        ctrl.stop_transport().unwrap();
        ctrl.render_frames(1).unwrap();
        assert!(!ctrl.rig.as_ref().unwrap().engine.is_running());
        assert_eq!(ctrl.frame_position(), 2);
    }

    #[test]
    fn toggle_mirrors_the_graph() {
        let mut ctrl = session();
        assert!(!ctrl.toggle_voice(VoiceId::Drone).unwrap());
        assert!(!ctrl.is_voice_enabled(VoiceId::Drone));
        ctrl.render_frames(1).unwrap();

        let rig = ctrl.rig.as_ref().unwrap();
        assert_eq!(rig.engine.graph().is_enabled(ctrl.voices.key(VoiceId::Drone)), Some(false));
        assert_eq!(rig.engine.graph().is_enabled(ctrl.voices.key(VoiceId::Click)), Some(true));
    }

    #[test]
    fn gain_is_clamped_and_ramped() {
        let mut ctrl = session();
        let drone = ctrl.voices.key(VoiceId::Drone);
        ctrl.set_voice_gain(VoiceId::Drone, 4.0).unwrap();
        ctrl.render_frames(SR as usize / 20).unwrap();
        let mid = ctrl.rig.as_ref().unwrap().engine.graph().current_gain(drone).unwrap();
        assert!(mid > 0.4 && mid < 1.0, "mid-ramp gain {mid}");

        ctrl.render_frames(SR as usize / 10).unwrap();
        let end = ctrl.rig.as_ref().unwrap().engine.graph().current_gain(drone).unwrap();
        assert_abs_diff_eq!(end, 1.0);
    }

    #[test]
    fn non_finite_gain_is_rejected() {
        let mut ctrl = session();
        let looped = ctrl.voices.key(VoiceId::Loop);
        assert!(matches!(ctrl.set_voice_gain(VoiceId::Loop, f32::NAN), Err(ControlError::InvalidGain(_))));
        assert!(matches!(
            ctrl.set_voice_gain(VoiceId::Loop, f32::NEG_INFINITY),
            Err(ControlError::InvalidGain(_))
        ));

        let frames = ctrl.render_frames(SR as usize / 5).unwrap();
        assert!(frames.iter().all(|f| f.left.is_finite() && f.right.is_finite()));
        let gain = ctrl.rig.as_ref().unwrap().engine.graph().current_gain(looped).unwrap();
        assert_abs_diff_eq!(gain, 0.6);
    }

    #[test]
    fn tap_receives_rendered_frames() {
        let mut ctrl = session();
        let rendered = ctrl.render_frames(1_000).unwrap();
        let tapped = ctrl.drain_tap();
        assert_eq!(tapped, rendered);
        assert!(ctrl.drain_tap().is_empty());
    }

    #[test]
    fn tap_drops_when_full() {
        let mut ctrl = session();
        ctrl.render_frames(SR as usize + 500).unwrap();
        assert_eq!(ctrl.drain_tap().len(), SR as usize);
    }

    #[test]
    fn render_seconds_counts_frames() {
        let mut ctrl = session();
        assert_eq!(ctrl.render_seconds(0.25).unwrap().len(), 12_000);
        assert!(ctrl.render_seconds(-1.0).unwrap().is_empty());
    }

    #[test]
    fn no_feed_means_no_signal() {
        let mut ctrl = session();
        assert_eq!(ctrl.tuner_reading(), TunerReading::NoSignal);
        assert_eq!(ctrl.push_mic_samples(&[0.1; 64]), 0);
    }

    #[test]
    fn pushed_samples_reach_the_tuner() {
        let mut ctrl = session();
        let readings = ctrl.readings();
        ctrl.attach_mic_feed(SR);

        let tone: Vec<f32> = (0..4_096).map(|i| 0.5 * (TAU * 440.0 * i as f32 / SR as f32).sin()).collect();
        assert_eq!(ctrl.push_mic_samples(&tone), tone.len());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while Instant::now() < deadline {
            if let Ok(reading) = readings.recv_timeout(Duration::from_millis(100)) {
                if reading.is_signal() {
                    seen = Some(reading);
                    break;
                }
            }
        }
        let reading = seen.expect("tuner never reported a pitch");
        assert_eq!(reading.note(), Some(Note::from_midi(69)));
        assert_eq!(ctrl.tuner_reading().note(), Some(Note::from_midi(69)));

        ctrl.stop_tuner();
        assert_eq!(ctrl.tuner_reading(), TunerReading::NoSignal);
    }

    fn tone(hz: f32) -> Vec<f32> {
        (0..4_096).map(|i| 0.5 * (TAU * hz * i as f32 / SR as f32).sin()).collect()
    }

    fn wait_for_note(ctrl: &Controller, midi: i32) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctrl.tuner_reading().note() != Some(Note::from_midi(midi)) {
            assert!(Instant::now() < deadline, "tuner never reported note {midi}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn late_subscriber_gets_the_current_reading() {
        let mut ctrl = session();
        ctrl.attach_mic_feed(SR);

        // Let a few dozen ticks of A3 go unread
        ctrl.push_mic_samples(&tone(220.0));
        wait_for_note(&ctrl, 57);
        std::thread::sleep(Duration::from_millis(500));

        ctrl.push_mic_samples(&tone(440.0));
        wait_for_note(&ctrl, 69);

        let first = ctrl.readings().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.note(), Some(Note::from_midi(69)));
        ctrl.stop_tuner();
    }

    #[test]
    fn tiny_feed_rate_does_not_panic() {
        let mut ctrl = session();
        ctrl.attach_mic_feed(0);
        ctrl.push_mic_samples(&[0.5; 4_096]);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ctrl.tuner_reading(), TunerReading::NoSignal);
        ctrl.stop_tuner();
    }
}
