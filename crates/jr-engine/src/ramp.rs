//! Linear gain ramp for click-free level changes.

/// Per-voice output gain, moved linearly toward its target one frame at a
/// time.
///
/// A new target restarts the ramp from the current value, so a change that
/// arrives mid-ramp never jumps.
#[derive(Clone, Debug)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
    ramp_frames: u32,
}

impl GainRamp {
    /// `ramp_secs` is the time a full change takes at `sample_rate`.
    pub fn new(initial: f32, ramp_secs: f32, sample_rate: u32) -> Self {
        let initial = if initial.is_finite() { initial.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
            ramp_frames: (ramp_secs * sample_rate as f32).max(1.0) as u32,
        }
    }

    /// Start ramping toward `target` (clamped to 0..=1). Non-finite
    /// targets are ignored.
    pub fn set_target(&mut self, target: f32) {
        if !target.is_finite() {
            return;
        }
        let target = target.clamp(0.0, 1.0);
        if target == self.target {
            return;
        }
        self.target = target;
        self.remaining = self.ramp_frames;
        self.step = (target - self.current) / self.ramp_frames as f32;
    }

    /// Jump straight to `value`. Non-finite values are ignored.
    pub fn set_immediate(&mut self, value: f32) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    /// Advance one frame and return the gain to apply to it.
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}
