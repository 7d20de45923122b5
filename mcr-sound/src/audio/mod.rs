//! Audio I/O: decoding, resampling, mixing buffers and output drivers

pub mod accumulator;
pub mod decoder;
pub mod driver;
pub mod output;
pub mod resampler;

pub use accumulator::MixAccumulator;
pub use decoder::StreamDecoder;
pub use driver::{AudioDriver, DriverClock, TimerDriver};
pub use output::{CpalDriver, OutputConfig};
pub use resampler::ResampleReader;
