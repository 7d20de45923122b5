//! Audio output using cpal
//!
//! [`CpalDriver`] opens an output device and drives the mixing engine from
//! the device callback. The engine always mixes stereo; other device channel
//! counts are mapped in the callback (mono gets the average, extra channels
//! get silence).

use super::driver::{AudioDriver, DriverClock};
use crate::error::{Error, Result};
use crate::playback::engine::MixingEngine;
use crate::playback::ring_buffer::CHANNELS;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use mcr_common::SoundConfig;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Output device selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputConfig {
    /// Device name (None = system default)
    pub device: Option<String>,

    /// Preferred sample rate (0 = device default)
    pub preferred_sample_rate: u32,

    /// Fixed buffer size in frames (None = device default)
    pub buffer_frames: Option<u32>,
}

impl OutputConfig {
    pub fn from_sound_config(config: &SoundConfig) -> Self {
        Self {
            device: config.output_device.clone(),
            preferred_sample_rate: config.preferred_sample_rate,
            buffer_frames: config.output_buffer_frames,
        }
    }
}

/// Output device driver
pub struct CpalDriver {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    clock: Arc<DriverClock>,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl CpalDriver {
    /// List output device names
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open the configured output device
    ///
    /// Falls back to the default device if the named one is missing.
    pub fn init(output: &OutputConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = match output.device.as_ref() {
            Some(name) => {
                let mut devices = host.output_devices().map_err(|e| {
                    Error::AudioOutput(format!("Failed to enumerate devices: {}", e))
                })?;
                match devices.find(|d| d.name().ok().as_ref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!(
                            "Requested device '{}' not found, falling back to default device",
                            name
                        );
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };

        let (mut config, sample_format) =
            Self::best_config(&device, output.preferred_sample_rate)?;

        if let Some(size) = output.buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(size);
            debug!("Using requested buffer size: {} frames", size);
        }

        info!(
            "Audio output: {} at {}Hz, {} channels, {:?}",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let clock = Arc::new(DriverClock::new(config.sample_rate.0));
        if let cpal::BufferSize::Fixed(size) = config.buffer_size {
            clock.set_latency(size as f64 / config.sample_rate.0 as f64);
        }

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            clock,
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Prefer a stereo f32 configuration at `preferred_rate`
    fn best_config(device: &Device, preferred_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
        if preferred_rate > 0 {
            let mut supported = device
                .supported_output_configs()
                .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

            let preferred = supported.find(|config| {
                config.channels() == CHANNELS as u16
                    && config.min_sample_rate().0 <= preferred_rate
                    && config.max_sample_rate().0 >= preferred_rate
                    && config.sample_format() == SampleFormat::F32
            });

            if let Some(supported) = preferred {
                let sample_format = supported.sample_format();
                let config = supported
                    .with_sample_rate(cpal::SampleRate(preferred_rate))
                    .config();
                return Ok((config, sample_format));
            }
            debug!(
                "No stereo f32 configuration at {}Hz, using device default",
                preferred_rate
            );
        }

        let supported = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        Ok((supported.config(), supported.sample_format()))
    }

    /// Clock to hand to [`MixingEngine::new`]
    pub fn clock(&self) -> Arc<DriverClock> {
        Arc::clone(&self.clock)
    }

    /// Start the stream, mixing from `engine`
    pub fn start(&mut self, engine: Arc<MixingEngine>) -> Result<()> {
        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(engine)?,
            SampleFormat::I16 => self.build_stream::<i16>(engine)?,
            SampleFormat::U16 => self.build_stream::<u16>(engine)?,
            sample_format => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);

        info!("Audio stream started");
        Ok(())
    }

    fn build_stream<T>(&self, engine: Arc<MixingEngine>) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.config.channels as usize;
        let rate = self.config.sample_rate.0 as f64;
        let clock = Arc::clone(&self.clock);
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);

        let mut mixed: i64 = 0;
        let mut scratch: Vec<f32> = vec![0.0; 4_096 * CHANNELS];

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);

                    let stamp = info.timestamp();
                    if let Some(latency) = stamp.playback.duration_since(&stamp.callback) {
                        clock.set_latency(latency.as_secs_f64());
                    }
                    let latency_frames = (clock.play_latency() * rate).round() as i64;
                    let heard = (mixed - latency_frames).max(0);
                    clock.set_position(heard);

                    if scratch.len() < frames * CHANNELS {
                        scratch.resize(frames * CHANNELS, 0.0);
                    }
                    engine.mix_f32(&mut scratch, frames, mixed, heard);
                    mixed += frames as i64;

                    for (out, stereo) in data.chunks_mut(channels).zip(scratch.chunks(CHANNELS)) {
                        write_frame(out, stereo[0], stereo[1]);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    /// Stop the stream
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
        }
        Ok(())
    }

    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    /// True if the stream reported an error since it started
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }
}

impl AudioDriver for CpalDriver {
    fn hardware_position(&self) -> i64 {
        self.clock.hardware_position()
    }

    fn play_latency(&self) -> f64 {
        self.clock.play_latency()
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop audio stream: {}", e);
        }
    }
}

/// Write one stereo frame to a device frame of any width
fn write_frame<T: Sample + FromSample<f32>>(out: &mut [T], left: f32, right: f32) {
    match out {
        [] => {}
        [mono] => *mono = T::from_sample((left + right) * 0.5),
        [l, r, rest @ ..] => {
            *l = T::from_sample(left);
            *r = T::from_sample(right);
            for extra in rest {
                *extra = T::from_sample(0.0);
            }
        }
    }
}
