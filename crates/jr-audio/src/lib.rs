//! Audio device I/O for jamroom.
//!
//! [`CpalOutput`] plays rendered frames on the default output device and
//! [`CpalInput`] captures the default microphone as mono `f32` for the
//! tuner. Both hand samples across threads through `ringbuf` SPSC rings.

mod cpal_backend;
mod cpal_input;
mod traits;

pub use cpal_backend::CpalOutput;
pub use cpal_input::CpalInput;
pub use traits::{AudioError, AudioOutput};
