//! Reader chain construction
//!
//! Turns a file path (or an already-open reader) into the decorated reader
//! a sound plays from. Stage selection comes from [`ChainOptions`], which is
//! normally derived from the `[chain]` section of the configuration.

use super::{BufferedReader, EnvelopeReader, MemoryReader, PanReader, RateReader, SoundReader};
use crate::audio::decoder::StreamDecoder;
use crate::audio::resampler::ResampleReader;
use crate::error::Result;
use mcr_common::config::ChainConfig;
use mcr_common::FadeCurve;
use std::path::Path;
use tracing::{debug, warn};

/// Which decorators wrap a base reader
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOptions {
    /// Rate the engine mixes at
    pub engine_rate: u32,

    /// Decode the whole file into memory before playing
    pub precache: bool,

    /// Precache automatically when the file is at most this long (0 = never)
    pub auto_precache_seconds: f64,

    pub resample: bool,
    pub rate_control: bool,
    pub pan: bool,

    /// Read-ahead chunk for the outermost stage (0 = no buffering stage)
    pub read_ahead_frames: usize,

    pub fade_curve: FadeCurve,
}

impl ChainOptions {
    /// Options with every stage enabled and no precaching
    pub fn new(engine_rate: u32) -> Self {
        Self::from_config(&ChainConfig::default(), engine_rate)
    }

    pub fn from_config(config: &ChainConfig, engine_rate: u32) -> Self {
        Self {
            engine_rate,
            precache: false,
            auto_precache_seconds: config.auto_precache_seconds,
            resample: config.resample,
            rate_control: config.rate_control,
            pan: config.pan,
            read_ahead_frames: config.read_ahead_frames,
            fade_curve: FadeCurve::default(),
        }
    }

    pub fn with_precache(mut self, precache: bool) -> Self {
        self.precache = precache;
        self
    }
}

/// Open `path` and build its full reader chain
pub fn open_reader(path: &Path, options: &ChainOptions) -> Result<Box<dyn SoundReader>> {
    let mut decoder = StreamDecoder::open(path)?;

    let short_enough = options.auto_precache_seconds > 0.0
        && decoder
            .length_frames()
            .map(|len| len as f64 / decoder.sample_rate() as f64 <= options.auto_precache_seconds)
            .unwrap_or(false);

    let base: Box<dyn SoundReader> = if options.precache || short_enough {
        debug!("Precaching {}", path.display());
        let memory = MemoryReader::from_reader(&mut decoder).map_err(crate::Error::Decode)?;
        Box::new(memory)
    } else {
        Box::new(decoder)
    };

    decorate(base, options)
}

/// Wrap an open reader in the decorators `options` selects
pub fn decorate(base: Box<dyn SoundReader>, options: &ChainOptions) -> Result<Box<dyn SoundReader>> {
    let mut reader: Box<dyn SoundReader> =
        Box::new(EnvelopeReader::new(base).with_fade_curve(options.fade_curve));

    if reader.sample_rate() != options.engine_rate {
        if options.resample {
            reader = Box::new(ResampleReader::new(reader, options.engine_rate)?);
        } else {
            warn!(
                "Source rate {}Hz differs from engine rate {}Hz and resampling is disabled",
                reader.sample_rate(),
                options.engine_rate
            );
        }
    }

    if options.rate_control {
        reader = Box::new(RateReader::new(reader));
    }

    if options.pan {
        reader = match PanReader::new(reader) {
            Ok(pan) => Box::new(pan),
            Err(unchanged) => {
                warn!(
                    "Cannot pan a {}-channel source, leaving it unpanned",
                    unchanged.num_channels()
                );
                unchanged
            }
        };
    }

    if options.read_ahead_frames > 0 {
        reader = Box::new(BufferedReader::new(reader, options.read_ahead_frames));
    }

    Ok(reader)
}
