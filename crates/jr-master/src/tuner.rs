//! Tuner side of a session: microphone samples in, readings out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use jr_engine::{EstimatorConfig, PitchEstimator};
use jr_ir::{map_estimate, Note, TunerReading};
use ringbuf::traits::Consumer;
use ringbuf::HeapCons;

const SIGNAL_BIT: u64 = 1 << 63;

/// The latest reading, readable from any thread without locking.
///
/// Layout: bit 63 set when pitched, bits 40..56 MIDI note, bits 32..40
/// cents, low 32 bits the frequency as `f32` bits.
#[derive(Debug)]
pub(crate) struct SharedReading(AtomicU64);

impl SharedReading {
    pub fn new() -> Self {
        Self(AtomicU64::new(pack(TunerReading::NoSignal)))
    }

    pub fn load(&self) -> TunerReading {
        unpack(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, reading: TunerReading) {
        self.0.store(pack(reading), Ordering::Release);
    }
}

fn pack(reading: TunerReading) -> u64 {
    match reading {
        TunerReading::NoSignal => 0,
        TunerReading::Pitched { note, cents, frequency_hz } => {
            SIGNAL_BIT
                | ((note.midi as i16 as u16 as u64) << 40)
                | ((cents as u8 as u64) << 32)
                | frequency_hz.to_bits() as u64
        }
    }
}

fn unpack(bits: u64) -> TunerReading {
    if bits & SIGNAL_BIT == 0 {
        return TunerReading::NoSignal;
    }
    TunerReading::Pitched {
        note: Note::from_midi((bits >> 40) as u16 as i16 as i32),
        cents: (bits >> 32) as u8 as i8,
        frequency_hz: f32::from_bits(bits as u32),
    }
}

/// Drains a capture ring into an estimator, one reading per tick.
pub struct TunerWorker {
    source: HeapCons<f32>,
    estimator: PitchEstimator,
    scratch: Vec<f32>,
}

impl TunerWorker {
    pub fn new(source: HeapCons<f32>, sample_rate: u32, config: EstimatorConfig) -> Self {
        let estimator = PitchEstimator::new(sample_rate, config);
        let scratch = vec![0.0; estimator.window_len()];
        Self { source, estimator, scratch }
    }

    /// Consume whatever arrived since the last tick and map the newest
    /// window to a reading. Until a full window has arrived the reading is
    /// "no signal".
    pub fn tick(&mut self) -> TunerReading {
        loop {
            let n = self.source.pop_slice(&mut self.scratch);
            self.estimator.push(&self.scratch[..n]);
            if n < self.scratch.len() {
                break;
            }
        }
        map_estimate(self.estimator.estimate().map(|e| e.frequency_hz))
    }
}

/// Publishing end of the readings queue. Keeps a receiver of its own so a
/// full queue can give up its oldest reading instead of the newest.
pub(crate) struct ReadingsFeed {
    tx: Sender<TunerReading>,
    stale: Receiver<TunerReading>,
}

impl ReadingsFeed {
    pub fn new(tx: Sender<TunerReading>, stale: Receiver<TunerReading>) -> Self {
        Self { tx, stale }
    }

    pub fn publish(&self, reading: TunerReading) {
        let mut pending = reading;
        // A subscriber may drain between the two calls; two tries suffice
        for _ in 0..2 {
            match self.tx.try_send(pending) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(r)) => {
                    pending = r;
                    let _ = self.stale.try_recv();
                }
            }
        }
    }
}

pub(crate) fn run(
    mut worker: TunerWorker,
    shared: Arc<SharedReading>,
    readings: ReadingsFeed,
    stop: Arc<AtomicBool>,
    period: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        let reading = worker.tick();
        // Queue first so a reader that sees the new value can receive it too
        readings.publish(reading);
        shared.store(reading);
        std::thread::sleep(period);
    }
}

/// Run the tuner over a recording, one reading per analysis window.
pub fn analyze(samples: &[f32], sample_rate: u32, config: EstimatorConfig) -> Vec<TunerReading> {
    let mut estimator = PitchEstimator::new(sample_rate, config);
    let window = estimator.window_len();
    samples
        .chunks_exact(window)
        .map(|chunk| {
            estimator.push(chunk);
            map_estimate(estimator.estimate().map(|e| e.frequency_hz))
        })
        .collect()
}
