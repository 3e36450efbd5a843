//! Core musical types for the jamroom practice engine.
//!
//! Beat-space time, musical subdivisions, note naming and the decoded
//! sample type shared by the engine, the format loaders and the host.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod musical_time;
mod note;
mod sample;
mod subdivision;

pub use musical_time::{MusicalTime, SUB_BEAT_UNIT};
pub use note::{map_estimate, map_frequency, Note, ParseNoteError, TunerReading, A4_HZ, A4_MIDI};
pub use sample::{Sample, SampleData};
pub use subdivision::{ParseSubdivisionError, Subdivision};
