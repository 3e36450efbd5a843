//! RIFF/WAVE decoding to f32 samples and 16-bit encoding of frames.

use std::io::Write;
use std::path::Path;

use jr_engine::Frame;
use jr_ir::{Sample, SampleData};

use crate::FormatError;

const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Stream parameters from a `fmt ` chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavSpec {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits: u16,
}

impl WavSpec {
    /// 16-bit stereo PCM, the export format.
    pub const fn export(sample_rate: u32) -> Self {
        Self { format: FORMAT_PCM, channels: 2, sample_rate, bits: 16 }
    }

    fn block_align(&self) -> u16 {
        self.channels * (self.bits / 8)
    }

    fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    fn check(self) -> Result<Self, FormatError> {
        let supported_bits = match self.format {
            FORMAT_PCM => matches!(self.bits, 8 | 16 | 24),
            FORMAT_FLOAT => self.bits == 32,
            _ => false,
        };
        if supported_bits && (1..=2).contains(&self.channels) && self.sample_rate > 0 {
            Ok(self)
        } else {
            Err(FormatError::Unsupported { format: self.format, bits: self.bits, channels: self.channels })
        }
    }
}

// --- Reading ---

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Walk the RIFF chunk list, returning the format and the PCM payload.
fn find_chunks(data: &[u8]) -> Result<(WavSpec, &[u8]), FormatError> {
    if data.len() < 12 {
        return Err(FormatError::UnexpectedEof);
    }
    if &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(FormatError::InvalidHeader);
    }

    let mut spec = None;
    let mut payload = None;
    let mut rest = &data[12..];
    while rest.len() >= 8 {
        let id = &rest[0..4];
        let size = le_u32(&rest[4..8]) as usize;
        let body = &rest[8..];

        match id {
            b"fmt " => {
                if size < 16 || body.len() < 16 {
                    return Err(FormatError::UnexpectedEof);
                }
                let mut format = le_u16(&body[0..2]);
                // WAVE_FORMAT_EXTENSIBLE carries the real tag in its subformat GUID
                if format == FORMAT_EXTENSIBLE && size >= 26 && body.len() >= 26 {
                    format = le_u16(&body[24..26]);
                }
                spec = Some(WavSpec {
                    format,
                    channels: le_u16(&body[2..4]),
                    sample_rate: le_u32(&body[4..8]),
                    bits: le_u16(&body[14..16]),
                });
            }
            b"data" => {
                // Writers that stream often leave the size short or oversized
                payload = Some(&body[..size.min(body.len())]);
            }
            _ => {}
        }

        let skip = 8 + size + (size & 1);
        if skip > rest.len() {
            break;
        }
        rest = &rest[skip..];
    }

    let spec = spec.ok_or(FormatError::MissingChunk("fmt "))?.check()?;
    let payload = payload.ok_or(FormatError::MissingChunk("data"))?;
    Ok((spec, payload))
}

fn decode_sample(spec: &WavSpec, b: &[u8]) -> f32 {
    match (spec.format, spec.bits) {
        // 8-bit WAV is unsigned, centred on 128
        (FORMAT_PCM, 8) => (b[0] as f32 - 128.0) / 128.0,
        (FORMAT_PCM, 16) => i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
        (FORMAT_PCM, 24) => (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / 8_388_608.0,
        (FORMAT_FLOAT, 32) => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        _ => 0.0,
    }
}

/// Decode a WAV file from memory.
pub fn load_wav(data: &[u8], name: &str) -> Result<Sample, FormatError> {
    let (spec, payload) = find_chunks(data)?;
    let width = (spec.bits / 8) as usize;
    let frames = payload.chunks_exact(spec.block_align() as usize);

    let mut sample = Sample::new(name, spec.sample_rate);
    sample.data = if spec.channels == 1 {
        SampleData::Mono(frames.map(|f| decode_sample(&spec, f)).collect())
    } else {
        let (left, right) = frames
            .map(|f| (decode_sample(&spec, &f[..width]), decode_sample(&spec, &f[width..])))
            .unzip();
        SampleData::Stereo(left, right)
    };

    tracing::debug!(
        name,
        channels = spec.channels,
        bits = spec.bits,
        rate = spec.sample_rate,
        frames = sample.len(),
        "decoded wav"
    );
    Ok(sample)
}

/// Read and decode a WAV file, naming the sample after the file stem.
pub fn load_wav_file(path: impl AsRef<Path>) -> Result<Sample, FormatError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("sample");
    load_wav(&data, name)
}

// --- Writing ---

fn write_header(w: &mut impl Write, spec: &WavSpec, data_size: u32) -> std::io::Result<()> {
    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_size).to_le_bytes())?;
    w.write_all(b"WAVE")?;

    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&spec.format.to_le_bytes())?;
    w.write_all(&spec.channels.to_le_bytes())?;
    w.write_all(&spec.sample_rate.to_le_bytes())?;
    w.write_all(&spec.byte_rate().to_le_bytes())?;
    w.write_all(&spec.block_align().to_le_bytes())?;
    w.write_all(&spec.bits.to_le_bytes())?;

    w.write_all(b"data")?;
    w.write_all(&data_size.to_le_bytes())
}

/// Encode frames as 16-bit stereo PCM, clamping out-of-range samples.
pub fn write_wav(w: &mut impl Write, frames: &[Frame], sample_rate: u32) -> std::io::Result<()> {
    let spec = WavSpec::export(sample_rate);
    let data_size = frames.len() as u32 * spec.block_align() as u32;
    write_header(w, &spec, data_size)?;
    for frame in frames {
        let (l, r) = frame.to_i16();
        w.write_all(&l.to_le_bytes())?;
        w.write_all(&r.to_le_bytes())?;
    }
    Ok(())
}

/// Encode frames to an in-memory WAV file.
pub fn frames_to_wav(frames: &[Frame], sample_rate: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(44 + frames.len() * 4);
    // Writing to a Vec cannot fail
    let _ = write_wav(&mut buf, frames, sample_rate);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: WavSpec, pcm: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_header(&mut buf, &spec, pcm.len() as u32).unwrap();
        buf.extend_from_slice(pcm);
        buf
    }

    fn spec(format: u16, channels: u16, bits: u16) -> WavSpec {
        WavSpec { format, channels, sample_rate: 22_050, bits }
    }

    #[test]
    fn decodes_8bit_unsigned() {
        let wav = wav_bytes(spec(FORMAT_PCM, 1, 8), &[128, 255, 0, 192]);
        let sample = load_wav(&wav, "eight").unwrap();
        assert_eq!(sample.sample_rate, 22_050);
        assert_eq!(sample.name.as_str(), "eight");
        match &sample.data {
            SampleData::Mono(v) => assert_eq!(v, &[0.0, 127.0 / 128.0, -1.0, 0.5]),
            other => panic!("expected mono, got {other:?}"),
        }
    }

    #[test]
    fn decodes_16bit_stereo() {
        let pcm: Vec<u8> = [16_384i16, -16_384, 0, 32_767]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let sample = load_wav(&wav_bytes(spec(FORMAT_PCM, 2, 16), &pcm), "st").unwrap();
        match &sample.data {
            SampleData::Stereo(l, r) => {
                assert_eq!(l, &[0.5, 0.0]);
                assert_eq!(r, &[-0.5, 32_767.0 / 32_768.0]);
            }
            other => panic!("expected stereo, got {other:?}"),
        }
    }

    #[test]
    fn decodes_24bit_and_float() {
        let pcm24 = [0x00, 0x00, 0x40, 0x00, 0x00, 0xC0];
        let s24 = load_wav(&wav_bytes(spec(FORMAT_PCM, 1, 24), &pcm24), "24").unwrap();
        assert_eq!(s24.data.frame(0).0, 0.5);
        assert_eq!(s24.data.frame(1).0, -0.5);

        let pcmf: Vec<u8> = [0.25f32, -0.75].iter().flat_map(|v| v.to_le_bytes()).collect();
        let sf = load_wav(&wav_bytes(spec(FORMAT_FLOAT, 1, 32), &pcmf), "f").unwrap();
        assert_eq!(sf.data.frame(1).0, -0.75);
    }

    #[test]
    fn skips_unknown_chunks() {
        let mut wav = wav_bytes(spec(FORMAT_PCM, 1, 16), &[0, 0x40]);
        // Insert an odd-sized LIST chunk (with pad byte) before fmt
        let mut list = b"LIST".to_vec();
        list.extend_from_slice(&3u32.to_le_bytes());
        list.extend_from_slice(&[1, 2, 3, 0]);
        wav.splice(12..12, list);
        let sample = load_wav(&wav, "list").unwrap();
        assert_eq!(sample.data.frame(0).0, 0.5);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(load_wav(b"not a wav", "x"), Err(FormatError::UnexpectedEof)));
        assert!(matches!(load_wav(b"RIFF\0\0\0\0AVIfxxxx", "x"), Err(FormatError::InvalidHeader)));
        assert!(matches!(
            load_wav(&wav_bytes(spec(FORMAT_PCM, 1, 12), &[0, 0]), "x"),
            Err(FormatError::Unsupported { bits: 12, .. })
        ));
        let no_data = b"RIFF\x04\0\0\0WAVE".to_vec();
        assert!(matches!(load_wav(&no_data, "x"), Err(FormatError::MissingChunk("fmt "))));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(load_wav_file("/nonexistent/loop.wav"), Err(FormatError::Io(_))));
    }

    #[test]
    fn export_encodes_16bit_stereo() {
        let frames = [Frame { left: 0.5, right: -0.5 }, Frame::mono(2.0)];
        let wav = frames_to_wav(&frames, 48_000);
        assert_eq!(wav.len(), 44 + 8);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(le_u32(&wav[24..28]), 48_000);

        let back = load_wav(&wav, "export").unwrap();
        assert_eq!(back.sample_rate, 48_000);
        assert_eq!(back.len(), 2);
        let (l, r) = back.data.frame(1);
        assert!(l > 0.999 && r > 0.999);
    }
}
