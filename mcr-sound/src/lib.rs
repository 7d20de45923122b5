//! # McRhythm Sound Engine (mcr-sound)
//!
//! Real-time audio playback and mixing.
//!
//! **Architecture:** files are decoded with symphonia, resampled with rubato
//! and wrapped in a chain of [`reader::SoundReader`] decorators. A
//! [`playback::MixingEngine`] owns a fixed pool of voices, refills their ring
//! buffers on a decode thread and mixes them in the output driver's callback
//! (cpal, or a timer-driven stand-in).
//!
//! ```text
//! Sound ──play──> MixingEngine ──voices──> decode thread ──reads──> SoundReader chain
//!                      ↑
//!             driver callback (mix_*)
//! ```

pub mod audio;
pub mod error;
pub mod playback;
pub mod reader;

pub use error::{Error, Result};
pub use playback::{EngineConfig, MixingEngine, Sound, SoundParams};
