//! Audio file formats for jamroom.
//!
//! Decodes RIFF/WAVE loop assets into [`jr_ir::Sample`] and encodes
//! rendered [`jr_engine::Frame`]s back to 16-bit stereo WAV for export.

mod wav;

use thiserror::Error;

pub use wav::{frames_to_wav, load_wav, load_wav_file, write_wav, WavSpec};

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not a RIFF/WAVE file")]
    InvalidHeader,
    #[error("file ends inside a chunk")]
    UnexpectedEof,
    #[error("missing `{0}` chunk")]
    MissingChunk(&'static str),
    #[error("unsupported encoding: format tag {format}, {bits} bits, {channels} channels")]
    Unsupported { format: u16, bits: u16, channels: u16 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
