//! Microphone capture for the tuner.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::traits::AudioError;

/// A running capture stream on the default input device.
///
/// Samples are downmixed to mono and pushed into a ring; when the reader
/// falls behind, new samples are dropped. Dropping the value stops capture.
pub struct CpalInput {
    _stream: Stream,
    sample_rate: u32,
    channels: u16,
}

impl CpalInput {
    /// Start capturing into a ring of `capacity` mono samples.
    pub fn open(capacity: usize) -> Result<(Self, HeapCons<f32>), AudioError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::MicrophoneUnavailable)?;
        let supported = device
            .default_input_config()
            .map_err(|_| AudioError::MicrophoneUnavailable)?;

        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();

        let stream = match format {
            cpal::SampleFormat::F32 => build::<f32>(&device, &config, producer)?,
            cpal::SampleFormat::I16 => build::<i16>(&device, &config, producer)?,
            cpal::SampleFormat::U16 => build::<u16>(&device, &config, producer)?,
            other => return Err(AudioError::UnsupportedFormat(other.to_string())),
        };
        stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;

        if let Ok(name) = device.name() {
            tracing::info!(device = %name, rate = config.sample_rate.0, channels = config.channels, "opened microphone");
        }

        let input = Self { _stream: stream, sample_rate: config.sample_rate.0, channels: config.channels };
        Ok((input, consumer))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

fn build<T>(device: &cpal::Device, config: &StreamConfig, mut producer: HeapProd<f32>) -> Result<Stream, AudioError>
where
    T: Sample + SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let scale = 1.0 / channels as f32;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let mono: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() * scale;
                    if producer.try_push(mono).is_err() {
                        break;
                    }
                }
            },
            |err| tracing::error!("microphone stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamCreate(e.to_string()))
}
