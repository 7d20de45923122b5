//! Test helpers for mcr-sound integration tests
//!
//! - `audio_generator`: deterministic WAV files written with hound
//! - `test_sources`: scripted voice sources and engines driven by hand

#![allow(dead_code)]

pub mod audio_generator;
pub mod test_sources;

pub use audio_generator::{write_constant_wav, write_sine_wav, TEST_SAMPLE_RATE};
pub use test_sources::{manual_engine, manual_engine_with, wait_until, SourceMode, TestSource};
