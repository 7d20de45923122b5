//! WAV fixture generation
//!
//! Values are written as 16-bit PCM. Multiples of 1/32768 survive the round
//! trip through the decoder exactly, so tests can compare samples with `==`.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Standard test sample rate (44.1 kHz)
pub const TEST_SAMPLE_RATE: u32 = 44_100;

fn spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write `frames` frames where every sample equals `value`
pub fn write_constant_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    value: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(sample_rate, channels))?;
    let sample = (value.clamp(-1.0, 1.0) * 32_768.0).round().min(32_767.0) as i16;
    for _ in 0..frames * channels as usize {
        writer.write_sample(sample)?;
    }
    writer.finalize()
}

/// Write a sine wave at `frequency_hz` on every channel
pub fn write_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(sample_rate, channels))?;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * amplitude * 32_767.0) as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()
}
