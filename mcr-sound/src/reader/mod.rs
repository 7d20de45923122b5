//! Sound readers
//!
//! Everything the engine plays is a [`SoundReader`]: a pull-based source of
//! interleaved f32 frames. A file is opened as a decoder (or decoded into
//! memory) and then wrapped in decorators, each adding one concern:
//!
//! ```text
//! StreamDecoder | MemoryReader
//!        ↓
//! EnvelopeReader   volume, fades, start/length window, stop mode
//!        ↓
//! ResampleReader   source rate → engine rate (only if they differ)
//!        ↓
//! RateReader       pitch / speed
//!        ↓
//! PanReader        mono → stereo, balance
//!        ↓
//! BufferedReader   read-ahead
//! ```
//!
//! Which stages are present is decided by [`factory::ChainOptions`].
//!
//! Source frames reported by [`SoundReader::next_source_frame`] are always in
//! the reader's own output sample rate, so the outermost reader's value
//! divided by its sample rate is a position in seconds.

pub mod buffered;
pub mod chain;
pub mod envelope;
pub mod factory;
pub mod memory;
pub mod pan;
pub mod rate;

pub use buffered::BufferedReader;
pub use chain::SoundChain;
pub use envelope::EnvelopeReader;
pub use factory::{open_reader, ChainOptions};
pub use memory::MemoryReader;
pub use pan::PanReader;
pub use rate::RateReader;

use std::fmt;
use tracing::trace;

/// Zero-progress reads retried by [`read_retrying`] before giving up
pub const MAX_READ_ATTEMPTS: usize = 4;

/// Non-data outcome of a read
///
/// None of these is a failure of the engine: `WouldBlock` means "try again
/// later", `EndOfFile` means the stream is exhausted and `Error` means the
/// reader stored a message retrievable through [`SoundReader::error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    WouldBlock,
    EndOfFile,
    Error,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::WouldBlock => write!(f, "would block"),
            ReadError::EndOfFile => write!(f, "end of file"),
            ReadError::Error => write!(f, "read error"),
        }
    }
}

/// Outcome of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekResult {
    Ok,
    /// Target lies beyond the end of the stream; the next read reports EOF
    PastEnd,
    Error,
}

/// What happens when the underlying stream ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// End the sound
    #[default]
    Stop,
    /// Seek back to the start point and keep playing
    Loop,
    /// Emit silence so the sound keeps time
    Continue,
}

impl StopMode {
    /// Parse a stop mode name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stop" => Some(StopMode::Stop),
            "loop" => Some(StopMode::Loop),
            "continue" => Some(StopMode::Continue),
            _ => None,
        }
    }
}

/// Adjustable reader parameter
///
/// Decorators handle the properties they own and pass the rest inward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Property {
    Pitch(f64),
    Speed(f64),
    Volume(f64),
    Pan(f64),
    FadeInSeconds(f64),
    FadeOutSeconds(f64),
    StopMode(StopMode),
    StartSeconds(f64),
    LengthSeconds(f64),
}

impl Property {
    /// Parse a property from its script name and string value
    ///
    /// Returns `None` for unknown names and unparsable values.
    pub fn parse(name: &str, value: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        if name == "stopmode" || name == "stop_mode" {
            return StopMode::parse(value).map(Property::StopMode);
        }

        let v: f64 = value.trim().parse().ok()?;
        if !v.is_finite() {
            return None;
        }
        match name.as_str() {
            "pitch" => Some(Property::Pitch(v)),
            "speed" => Some(Property::Speed(v)),
            "volume" => Some(Property::Volume(v)),
            "pan" => Some(Property::Pan(v)),
            "fadeinseconds" | "fade_in_seconds" => Some(Property::FadeInSeconds(v)),
            "fadeoutseconds" | "fade_out_seconds" => Some(Property::FadeOutSeconds(v)),
            "startseconds" | "start_seconds" => Some(Property::StartSeconds(v)),
            "lengthseconds" | "length_seconds" => Some(Property::LengthSeconds(v)),
            _ => None,
        }
    }
}

/// Pull-based source of interleaved f32 audio
pub trait SoundReader: Send {
    /// Read up to `frames` frames into `buf[..frames * num_channels()]`
    ///
    /// Returns the number of frames written. A short read is not an error;
    /// `EndOfFile` is only returned once no frame at all could be produced.
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError>;

    /// Move the read position to `frame` (in this reader's sample rate)
    fn set_position(&mut self, frame: i64) -> SeekResult;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Output channel count
    fn num_channels(&self) -> usize;

    /// Source position of the next frame `read` will return
    fn next_source_frame(&self) -> i64;

    /// Source frames advanced per output frame
    fn stream_to_source_ratio(&self) -> f64 {
        1.0
    }

    /// Total length in frames, if known
    fn length_frames(&self) -> Option<i64> {
        None
    }

    /// Last stored error message
    fn error(&self) -> Option<String> {
        None
    }

    /// Apply a property; returns false if nothing in the chain handles it
    fn set_property(&mut self, _property: &Property) -> bool {
        false
    }

    /// Independent reader over the same data, positioned at the start
    fn try_clone(&self) -> Option<Box<dyn SoundReader>>;
}

impl SoundReader for Box<dyn SoundReader> {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        (**self).read(buf, frames)
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        (**self).set_position(frame)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn num_channels(&self) -> usize {
        (**self).num_channels()
    }

    fn next_source_frame(&self) -> i64 {
        (**self).next_source_frame()
    }

    fn stream_to_source_ratio(&self) -> f64 {
        (**self).stream_to_source_ratio()
    }

    fn length_frames(&self) -> Option<i64> {
        (**self).length_frames()
    }

    fn error(&self) -> Option<String> {
        (**self).error()
    }

    fn set_property(&mut self, property: &Property) -> bool {
        (**self).set_property(property)
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        (**self).try_clone()
    }
}

/// Read, retrying zero-progress results a bounded number of times
///
/// `Ok(0)` and `WouldBlock` count as zero progress. After
/// [`MAX_READ_ATTEMPTS`] of them `WouldBlock` is reported. EOF and errors are
/// returned immediately.
pub fn read_retrying<R>(reader: &mut R, buf: &mut [f32], frames: usize) -> Result<usize, ReadError>
where
    R: SoundReader + ?Sized,
{
    read_from_origin(reader, buf, frames).map(|block| block.frames)
}

/// Frames delivered by [`read_from_origin`] and where they came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OriginRead {
    pub frames: usize,
    /// Source frame of the first delivered frame
    pub source_frame: i64,
    pub ratio: f64,
}

/// [`read_retrying`] that also reports the source frame the data starts at
///
/// The origin is sampled before each attempt, since an empty read may have
/// moved the reader (a loop restart).
pub fn read_from_origin<R>(
    reader: &mut R,
    buf: &mut [f32],
    frames: usize,
) -> Result<OriginRead, ReadError>
where
    R: SoundReader + ?Sized,
{
    let mut origin = OriginRead {
        frames: 0,
        source_frame: reader.next_source_frame(),
        ratio: reader.stream_to_source_ratio(),
    };
    if frames == 0 {
        return Ok(origin);
    }

    for attempt in 0..MAX_READ_ATTEMPTS {
        origin.source_frame = reader.next_source_frame();
        origin.ratio = reader.stream_to_source_ratio();
        match reader.read(buf, frames) {
            Ok(0) | Err(ReadError::WouldBlock) => {
                trace!("Zero-progress read (attempt {})", attempt + 1);
            }
            Ok(n) => {
                origin.frames = n;
                return Ok(origin);
            }
            Err(e) => return Err(e),
        }
    }
    Err(ReadError::WouldBlock)
}

/// Frames for `seconds` at `rate`, never negative
pub(crate) fn seconds_to_frames(seconds: f64, rate: u32) -> i64 {
    mcr_common::time::seconds_to_frames(seconds.max(0.0), rate)
}
