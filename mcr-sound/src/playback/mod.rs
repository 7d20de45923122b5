//! Voice mixing and playback handles

mod decoder_worker;
pub mod engine;
pub mod params;
pub mod position_map;
pub mod ring_buffer;
pub mod sound;
pub mod underrun;
pub mod voice;

pub use engine::{EngineConfig, LoadErrorReporter, MixingEngine};
pub use params::SoundParams;
pub use position_map::PositionMap;
pub use sound::{PlaybackPosition, Sound};
pub use voice::{BlockRead, FinishInfo, MixSource, StartOptions, VoiceHandle, VoiceState};
