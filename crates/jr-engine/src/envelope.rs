//! ADSR amplitude envelope.
//!
//! Segments are linear. A gate-on restarts the attack from the current level
//! so a retrigger never clicks; a gate-off releases from wherever the
//! envelope is.

/// Envelope shape in seconds (sustain is a level, 0..=1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Envelope {
    pub const fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self { attack, decay, sustain, release }
    }

    /// Short percussive hit used by the click.
    pub const CLICK: Envelope = Envelope::new(0.001, 0.15, 0.01, 0.05);

    /// Slow pad used by the drone.
    pub const DRONE: Envelope = Envelope::new(0.2, 0.3, 0.6, 1.2);
}

impl Default for Envelope {
    fn default() -> Self {
        Self::DRONE
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnvelopePhase {
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Runtime state for one envelope, advanced once per output frame.
#[derive(Clone, Debug)]
pub struct EnvelopeState {
    phase: EnvelopePhase,
    level: f32,
    sustain: f32,
    /// Per-frame level deltas, precomputed from the shape.
    attack_step: f32,
    decay_step: f32,
    release_frames: f32,
    release_step: f32,
}

fn frames(secs: f32, sample_rate: u32) -> f32 {
    (secs * sample_rate as f32).max(1.0)
}

impl EnvelopeState {
    pub fn new(envelope: Envelope, sample_rate: u32) -> Self {
        let sustain = envelope.sustain.clamp(0.0, 1.0);
        Self {
            phase: EnvelopePhase::Idle,
            level: 0.0,
            sustain,
            attack_step: 1.0 / frames(envelope.attack, sample_rate),
            decay_step: (1.0 - sustain) / frames(envelope.decay, sample_rate),
            release_frames: frames(envelope.release, sample_rate),
            release_step: 0.0,
        }
    }

    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Whether the envelope is producing any output.
    pub fn is_active(&self) -> bool {
        self.phase != EnvelopePhase::Idle
    }

    pub fn gate_on(&mut self) {
        self.phase = EnvelopePhase::Attack;
    }

    pub fn gate_off(&mut self) {
        if matches!(self.phase, EnvelopePhase::Idle | EnvelopePhase::Release) {
            return;
        }
        self.phase = EnvelopePhase::Release;
        self.release_step = self.level / self.release_frames;
    }

    /// Advance one frame and return the new level.
    #[inline]
    pub fn next_level(&mut self) -> f32 {
        match self.phase {
            EnvelopePhase::Idle => {}
            EnvelopePhase::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.phase = EnvelopePhase::Decay;
                }
            }
            EnvelopePhase::Decay => {
                self.level -= self.decay_step;
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.phase = EnvelopePhase::Sustain;
                }
            }
            EnvelopePhase::Sustain => self.level = self.sustain,
            EnvelopePhase::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.phase = EnvelopePhase::Idle;
                }
            }
        }
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 1_000;

    fn run(state: &mut EnvelopeState, n: usize) -> f32 {
        let mut last = 0.0;
        for _ in 0..n {
            last = state.next_level();
        }
        last
    }

    #[test]
    fn full_cycle() {
        let mut env = EnvelopeState::new(Envelope::new(0.1, 0.1, 0.5, 0.1), SR);
        assert!(!env.is_active());
        assert_eq!(env.next_level(), 0.0);

        env.gate_on();
        run(&mut env, 105);
        assert_eq!(env.phase(), EnvelopePhase::Decay);
        assert!(env.level() > 0.9);

        run(&mut env, 110);
        assert_eq!(env.phase(), EnvelopePhase::Sustain);
        assert_eq!(env.level(), 0.5);

        env.gate_off();
        assert_eq!(env.phase(), EnvelopePhase::Release);
        run(&mut env, 110);
        assert_eq!(env.phase(), EnvelopePhase::Idle);
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn levels_stay_in_range() {
        let mut env = EnvelopeState::new(Envelope::CLICK, 48_000);
        env.gate_on();
        for i in 0..48_000 {
            if i == 2_400 {
                env.gate_off();
            }
            let level = env.next_level();
            assert!((0.0..=1.0).contains(&level), "level {level} at frame {i}");
        }
        assert!(!env.is_active());
    }

    #[test]
    fn retrigger_continues_from_current_level() {
        let mut env = EnvelopeState::new(Envelope::new(0.1, 0.1, 0.5, 1.0), SR);
        env.gate_on();
        run(&mut env, 250);
        env.gate_off();
        let released = run(&mut env, 10);
        env.gate_on();
        let next = env.next_level();
        assert!(next > released);
        assert!(next - released < 0.05);
    }

    #[test]
    fn gate_off_while_idle_is_ignored() {
        let mut env = EnvelopeState::new(Envelope::DRONE, SR);
        env.gate_off();
        assert_eq!(env.phase(), EnvelopePhase::Idle);
    }
}
