//! Voice slots and the source contract
//!
//! A voice slot is one entry of the engine's fixed pool. Its lifecycle:
//!
//! ```text
//! Available ──start_mixing──> Buffering ──prebuffered──> Playing
//!     ↑                                                    │ EOF / error
//!     │                                                    ↓
//!     └──(mix, source released)── Halting <──drained── Stopping
//!                                    ↑
//!                         stop_mixing (from any active state)
//! ```
//!
//! Slots are addressed by [`VoiceHandle`]s carrying a generation; a handle
//! whose generation no longer matches its slot is stale and ignored.

use super::position_map::PositionMap;
use super::ring_buffer::{BlockConsumer, BlockProducer};
use crate::reader::ReadError;
use std::sync::{Arc, Mutex};

/// Voice slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Unused
    Available,
    /// Assigned, ring buffer being prefilled on the caller's thread
    Buffering,
    /// Decode thread keeps the ring full, mix drains it
    Playing,
    /// Source ended or failed; queued audio still drains
    Stopping,
    /// Waiting for the source to be released before reuse
    Halting,
}

impl VoiceState {
    /// States in which the voice belongs to a caller
    pub fn is_active(self) -> bool {
        matches!(
            self,
            VoiceState::Buffering | VoiceState::Playing | VoiceState::Stopping
        )
    }
}

/// Generation-checked reference to a voice slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle {
    pub index: usize,
    pub generation: u64,
}

/// One block read from a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockRead {
    /// Stereo frames written
    pub frames: usize,
    /// Source frame of the first frame written
    pub source_frame: i64,
    /// Source frames per stream frame for this block
    pub ratio: f64,
}

/// Delivered once when a voice finishes on its own
#[derive(Debug, Clone, PartialEq)]
pub struct FinishInfo {
    /// Source frame reached at the end of playback
    pub source_frame: i64,
    /// Error that ended playback, if any
    pub error: Option<String>,
}

/// Audio producer attached to a voice
///
/// Called from the prebuffering thread and the decode thread, never from the
/// mix callback. After `stop_mixing` returns, no method is called again.
pub trait MixSource: Send + Sync {
    /// Fill `buf` with up to `frames` interleaved stereo frames
    fn read_block(&self, buf: &mut [f32], frames: usize) -> Result<BlockRead, ReadError>;

    /// Message for the last `ReadError::Error`
    fn error(&self) -> Option<String>;

    /// Natural end of playback (EOF or error, after draining)
    fn finished(&self, info: FinishInfo);
}

/// When a voice starts producing audio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Hardware frame of the first audible frame (None = as soon as possible)
    pub start_frame: Option<i64>,
}

impl StartOptions {
    pub fn at_frame(frame: i64) -> Self {
        Self {
            start_frame: Some(frame),
        }
    }
}

/// Source attached to a slot, tagged with the generation it belongs to
pub(crate) struct AttachedSource {
    pub generation: u64,
    pub source: Arc<dyn MixSource>,
}

/// Per-slot state outside the data lock
pub(crate) struct Slot {
    /// Held by the decode thread for the duration of each read
    pub source: Mutex<Option<AttachedSource>>,
    pub producer: Mutex<BlockProducer>,
}

/// Per-slot bookkeeping guarded by the engine's data lock
pub(crate) struct VoiceData {
    pub state: VoiceState,
    pub generation: u64,
    pub paused: bool,
    pub start_frame: Option<i64>,
    pub hw_to_stream: PositionMap,
    pub stream_to_source: PositionMap,
    /// Stream frame stamped on the next decoded block
    pub next_stream_frame: i64,
    /// Stream frame of the next frame the mixer consumes
    pub play_stream_frame: i64,
    pub error: Option<String>,
    /// Stopping and the ring buffer ran empty
    pub drained: bool,
    /// The slot's source reference has not been released yet
    pub source_attached: bool,
    pub consumer: BlockConsumer,
}

impl VoiceData {
    pub fn new(consumer: BlockConsumer, map_capacity: usize) -> Self {
        Self {
            state: VoiceState::Available,
            generation: 0,
            paused: false,
            start_frame: None,
            hw_to_stream: PositionMap::with_capacity(map_capacity),
            stream_to_source: PositionMap::with_capacity(map_capacity),
            next_stream_frame: 0,
            play_stream_frame: 0,
            error: None,
            drained: false,
            source_attached: false,
            consumer,
        }
    }

    /// True if `handle` refers to this slot's current assignment
    pub fn matches(&self, handle: VoiceHandle) -> bool {
        self.generation == handle.generation && self.state != VoiceState::Available
    }

    /// Prepare for a new assignment
    pub fn assign(&mut self, start_frame: Option<i64>) -> u64 {
        self.generation += 1;
        self.state = VoiceState::Buffering;
        self.paused = false;
        self.start_frame = start_frame;
        self.hw_to_stream.clear();
        self.stream_to_source.clear();
        self.next_stream_frame = 0;
        self.play_stream_frame = 0;
        self.error = None;
        self.drained = false;
        self.source_attached = true;
        self.consumer.clear();
        self.generation
    }

    /// Return the slot to the pool
    pub fn release(&mut self) {
        self.state = VoiceState::Available;
        self.paused = false;
        self.consumer.clear();
    }
}
