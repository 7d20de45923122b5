//! Sound engine configuration loading
//!
//! Configuration is a small TOML file. Resolution priority:
//! 1. Explicit path (command-line argument)
//! 2. `MCR_SOUND_CONFIG` environment variable
//! 3. `<config dir>/mcr/sound.toml` for the current platform
//! 4. Compiled defaults
//!
//! A missing or unreadable file never stops startup: a warning is logged and
//! the compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "MCR_SOUND_CONFIG";

/// Lowest sample rate accepted from configuration
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest sample rate accepted from configuration
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Upper bound on the voice pool size
pub const MAX_VOICES: usize = 256;

/// Sound engine configuration
///
/// Every field has a built-in default, so an empty file (or no file at all)
/// yields a working configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Preferred output sample rate in Hz (0 = use the device default)
    pub preferred_sample_rate: u32,

    /// Frames of decoded audio buffered ahead of the mixer, per voice
    pub decode_buffer_frames: usize,

    /// Number of voice slots (simultaneously playing sounds)
    pub max_voices: usize,

    /// Decode thread wake-up period in milliseconds
    pub decode_period_ms: u64,

    /// Minimum interval between underrun log messages in milliseconds
    pub underrun_log_interval_ms: u64,

    /// Output device name (None = system default)
    pub output_device: Option<String>,

    /// Output buffer size in frames (None = device default)
    pub output_buffer_frames: Option<u32>,

    /// Skip sounds played as "actions" (menu and gameplay feedback)
    pub mute_actions: bool,

    /// Reader chain construction options
    pub chain: ChainConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: 44_100,
            decode_buffer_frames: 8_192,
            max_voices: 16,
            decode_period_ms: 10,
            underrun_log_interval_ms: 1_000,
            output_device: None,
            output_buffer_frames: None,
            mute_actions: false,
            chain: ChainConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Which decorators are stacked around a decoder at load time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Resample sources whose rate differs from the engine rate
    pub resample: bool,

    /// Add the pitch/speed stage
    pub rate_control: bool,

    /// Add the pan stage (also upmixes mono to stereo)
    pub pan: bool,

    /// Read-ahead chunk in frames for the outermost buffering stage (0 = none)
    pub read_ahead_frames: usize,

    /// Files shorter than this many seconds are decoded fully into memory
    /// even when precaching was not requested (0 = never)
    pub auto_precache_seconds: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            resample: true,
            rate_control: true,
            pan: true,
            read_ahead_frames: 2_048,
            auto_precache_seconds: 0.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SoundConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SoundConfig = toml::from_str(text)?;
        Ok(config.validated())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded sound configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration following the resolution priority order
    ///
    /// Never fails: any problem is logged and defaults are returned.
    pub fn load(cli_path: Option<&Path>) -> Self {
        let Some(path) = resolve_config_path(cli_path) else {
            info!("No sound configuration file found, using defaults");
            return Self::default();
        };

        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load sound configuration {}: {} (using defaults)",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Clamp out-of-range values into their supported range
    ///
    /// Each adjustment is logged so a bad file is visible without being fatal.
    pub fn validated(mut self) -> Self {
        if self.preferred_sample_rate != 0
            && !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.preferred_sample_rate)
        {
            let clamped = self.preferred_sample_rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
            warn!(
                "preferred_sample_rate {} out of range, using {}",
                self.preferred_sample_rate, clamped
            );
            self.preferred_sample_rate = clamped;
        }

        if self.decode_buffer_frames < 1_024 {
            warn!(
                "decode_buffer_frames {} too small, using 1024",
                self.decode_buffer_frames
            );
            self.decode_buffer_frames = 1_024;
        }

        if self.max_voices == 0 || self.max_voices > MAX_VOICES {
            let clamped = self.max_voices.clamp(1, MAX_VOICES);
            warn!("max_voices {} out of range, using {}", self.max_voices, clamped);
            self.max_voices = clamped;
        }

        if self.decode_period_ms == 0 {
            self.decode_period_ms = 1;
        }

        if !self.chain.auto_precache_seconds.is_finite() || self.chain.auto_precache_seconds < 0.0 {
            self.chain.auto_precache_seconds = 0.0;
        }

        self
    }
}

/// Find the configuration file to load, if any
///
/// An explicit path or environment variable is returned even when the file
/// does not exist, so the caller can report it. The platform default is only
/// returned when present.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|path| path.exists())
}

/// Platform default configuration file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mcr").join("sound.toml"))
}

/// Ensure a configuration value is a positive, finite number
pub fn require_positive(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidInput(format!("{} must be positive, got {}", name, value)))
    }
}
