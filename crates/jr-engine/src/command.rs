//! Cross-thread control of a running engine.
//!
//! Tempo is a single `f64` published through an atomic so the audio thread
//! never observes a torn write. Everything else travels as a [`Command`]
//! through a lock-free SPSC ring the engine drains at the top of every
//! rendered frame. Memory the engine lets go of travels back the other way
//! as [`Retired`] values, so the audio thread never frees anything.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF64;
use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};
use thiserror::Error;

use crate::clock::{validate_tempo, ClockError};
use crate::graph::{AudioGraph, RetiredVoice, VoiceKey};
use crate::scheduler::RetiredEvent;

/// Requests the host can make of the audio thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Start,
    Stop,
    SetGain(VoiceKey, f32),
    SetEnabled(VoiceKey, bool),
    Toggle(VoiceKey),
    Trigger(VoiceKey),
    /// Cancel the voice's events, then drop it from the graph.
    Dispose(VoiceKey),
}

#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum CommandError {
    #[error("engine command queue is full")]
    QueueFull,
    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// Memory released by the engine, dropped on the host side.
pub enum Retired {
    Voice(RetiredVoice),
    Event(RetiredEvent<AudioGraph>),
}

/// Single-writer tempo cell shared between the host and the engine. Only
/// [`EngineControl`] stores into it; the engine only loads.
#[derive(Debug)]
pub struct SharedTempo(AtomicF64);

impl SharedTempo {
    pub fn new(bpm: f64) -> Self {
        Self(AtomicF64::new(bpm))
    }

    pub fn load(&self) -> f64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn store(&self, bpm: f64) {
        self.0.store(bpm, Ordering::Release);
    }
}

/// Host-side handle to an [`Engine`](crate::Engine) running elsewhere.
pub struct EngineControl {
    tempo: Arc<SharedTempo>,
    commands: HeapProd<Command>,
    retired: HeapCons<Retired>,
}

impl EngineControl {
    pub(crate) fn new(tempo: Arc<SharedTempo>, commands: HeapProd<Command>, retired: HeapCons<Retired>) -> Self {
        Self { tempo, commands, retired }
    }

    /// Last tempo published to the engine.
    pub fn tempo(&self) -> f64 {
        self.tempo.load()
    }

    /// Publish a new tempo; the engine picks it up on its next frame.
    pub fn set_tempo(&self, bpm: f64) -> Result<(), CommandError> {
        self.tempo.store(validate_tempo(bpm)?);
        Ok(())
    }

    /// Queue a command. Also frees whatever the engine has retired since
    /// the last call.
    pub fn send(&mut self, command: Command) -> Result<(), CommandError> {
        self.release_retired();
        self.commands.try_push(command).map_err(|_| CommandError::QueueFull)
    }

    /// Drop voices and events the engine has handed back. Returns how many.
    pub fn release_retired(&mut self) -> usize {
        let mut released = 0;
        while let Some(retired) = self.retired.try_pop() {
            drop(retired);
            released += 1;
        }
        released
    }

    pub fn start(&mut self) -> Result<(), CommandError> {
        self.send(Command::Start)
    }

    pub fn stop(&mut self) -> Result<(), CommandError> {
        self.send(Command::Stop)
    }

    pub fn set_gain(&mut self, voice: VoiceKey, gain: f32) -> Result<(), CommandError> {
        self.send(Command::SetGain(voice, gain))
    }

    pub fn set_enabled(&mut self, voice: VoiceKey, enabled: bool) -> Result<(), CommandError> {
        self.send(Command::SetEnabled(voice, enabled))
    }

    pub fn toggle(&mut self, voice: VoiceKey) -> Result<(), CommandError> {
        self.send(Command::Toggle(voice))
    }

    pub fn trigger(&mut self, voice: VoiceKey) -> Result<(), CommandError> {
        self.send(Command::Trigger(voice))
    }

    pub fn dispose(&mut self, voice: VoiceKey) -> Result<(), CommandError> {
        self.send(Command::Dispose(voice))
    }
}
