//! WAV fixture generation
//!
//! Deterministic 16-bit files for exercising the symphonia decode path.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

fn spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Every sample of every channel at `amplitude` (-1.0..=1.0)
pub fn generate_constant_wav<P: AsRef<Path>>(
    path: P,
    channels: u16,
    sample_rate: u32,
    frames: u32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(channels, sample_rate))?;
    let value = (amplitude.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
    for _ in 0..frames * u32::from(channels) {
        writer.write_sample(value)?;
    }
    writer.finalize()
}

/// Sine wave at `frequency_hz` on every channel
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    channels: u16,
    sample_rate: u32,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(channels, sample_rate))?;
    let frames = u64::from(sample_rate) * duration_ms / 1000;
    for frame in 0..frames {
        let t = frame as f32 / sample_rate as f32;
        let value = (amplitude * (2.0 * PI * frequency_hz * t).sin() * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()
}
