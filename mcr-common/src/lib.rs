//! # McRhythm Common Library
//!
//! Shared code for the McRhythm sound crates:
//! - Configuration loading (`SoundConfig`, TOML resolution order)
//! - Common error type
//! - Fade curve definitions
//! - Frame/second conversion helpers

pub mod config;
pub mod error;
pub mod fade_curves;
pub mod time;

pub use config::SoundConfig;
pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
