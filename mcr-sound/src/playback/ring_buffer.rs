//! Per-voice block ring buffer
//!
//! Decoded audio travels from the decode side to the mix callback in fixed
//! size [`SoundBlock`]s over a single-producer single-consumer `ringbuf`.
//! Every block carries the stream frame of its first frame, so the mixer can
//! record exactly which stream frames reached the hardware.
//!
//! ```text
//! prebuffer / decode thread ──push()──> [HeapRb<SoundBlock>] ──read_into()──> mix
//! ```

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};

/// Frames per block
pub const BLOCK_FRAMES: usize = 512;

/// Channels carried by every block (engine output is always stereo)
pub const CHANNELS: usize = 2;

/// Samples per block
pub const BLOCK_SAMPLES: usize = BLOCK_FRAMES * CHANNELS;

/// Fixed-size chunk of interleaved stereo audio
#[derive(Clone)]
pub struct SoundBlock {
    /// Interleaved samples; only the first `frames * CHANNELS` are valid
    pub samples: [f32; BLOCK_SAMPLES],

    /// Valid frames in `samples`
    pub frames: usize,

    /// Stream frame of the first frame in this block
    pub position: i64,
}

impl Default for SoundBlock {
    fn default() -> Self {
        Self {
            samples: [0.0; BLOCK_SAMPLES],
            frames: 0,
            position: 0,
        }
    }
}

impl std::fmt::Debug for SoundBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundBlock")
            .field("frames", &self.frames)
            .field("position", &self.position)
            .finish()
    }
}

impl SoundBlock {
    /// The valid interleaved samples
    pub fn data(&self) -> &[f32] {
        &self.samples[..self.frames * CHANNELS]
    }
}

/// Number of blocks needed to hold `frames` frames (at least two)
pub fn blocks_for_frames(frames: usize) -> usize {
    frames.div_ceil(BLOCK_FRAMES).max(2)
}

/// Create a ring holding `capacity` blocks
pub fn block_ring(capacity: usize) -> (BlockProducer, BlockConsumer) {
    let capacity = capacity.max(1);
    let (prod, cons) = HeapRb::<SoundBlock>::new(capacity).split();
    (
        BlockProducer { prod, capacity },
        BlockConsumer {
            cons,
            current: None,
            cursor: 0,
        },
    )
}

/// Write half, used by the prebuffering caller and the decode thread
pub struct BlockProducer {
    prod: HeapProd<SoundBlock>,
    capacity: usize,
}

impl BlockProducer {
    /// Free block slots
    pub fn vacant_blocks(&self) -> usize {
        self.prod.vacant_len()
    }

    /// True when no block can be pushed
    pub fn is_full(&self) -> bool {
        self.prod.is_full()
    }

    /// Ring capacity in blocks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a block, handing it back if the ring is full
    pub fn push(&mut self, block: SoundBlock) -> Result<(), SoundBlock> {
        self.prod.try_push(block)
    }
}

/// Read half, used only by the mix callback
pub struct BlockConsumer {
    cons: HeapCons<SoundBlock>,

    /// Partially consumed block
    current: Option<SoundBlock>,

    /// Frames of `current` already consumed
    cursor: usize,
}

impl BlockConsumer {
    /// Hand up to `frames` buffered frames to `sink`
    ///
    /// `sink` receives contiguous interleaved runs together with the stream
    /// frame of the run's first frame. A run boundary falls wherever a block
    /// ends. Returns the number of frames delivered.
    pub fn read_into<F>(&mut self, frames: usize, mut sink: F) -> usize
    where
        F: FnMut(&[f32], i64),
    {
        let mut delivered = 0;
        while delivered < frames {
            if self.current.is_none() {
                match self.cons.try_pop() {
                    Some(block) if block.frames > 0 => {
                        self.current = Some(block);
                        self.cursor = 0;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }

            let Some(block) = self.current.as_ref() else {
                break;
            };

            let n = (block.frames - self.cursor).min(frames - delivered);
            let start = self.cursor * CHANNELS;
            sink(
                &block.samples[start..start + n * CHANNELS],
                block.position + self.cursor as i64,
            );

            delivered += n;
            self.cursor += n;
            if self.cursor >= block.frames {
                self.current = None;
                self.cursor = 0;
            }
        }
        delivered
    }

    /// True when no buffered frame remains
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.cons.is_empty()
    }

    /// Queued blocks, not counting a partially consumed one
    pub fn queued_blocks(&self) -> usize {
        self.cons.occupied_len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.current = None;
        self.cursor = 0;
        while self.cons.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(position: i64, frames: usize, value: f32) -> SoundBlock {
        let mut b = SoundBlock::default();
        b.samples[..frames * CHANNELS].fill(value);
        b.frames = frames;
        b.position = position;
        b
    }

    #[test]
    fn test_runs_carry_stream_positions() {
        let (mut prod, mut cons) = block_ring(4);
        prod.push(block(0, 100, 0.1)).unwrap();
        prod.push(block(100, 100, 0.2)).unwrap();

        let mut runs = Vec::new();
        let got = cons.read_into(150, |data, pos| runs.push((data.len() / CHANNELS, pos)));
        assert_eq!(got, 150);
        assert_eq!(runs, vec![(100, 0), (50, 100)]);

        runs.clear();
        let got = cons.read_into(150, |data, pos| runs.push((data.len() / CHANNELS, pos)));
        assert_eq!(got, 50);
        assert_eq!(runs, vec![(50, 150)]);
        assert!(cons.is_empty());
    }

    #[test]
    fn test_full_ring_returns_block() {
        let (mut prod, _cons) = block_ring(2);
        prod.push(block(0, 1, 0.0)).unwrap();
        prod.push(block(1, 1, 0.0)).unwrap();
        assert!(prod.is_full());
        let rejected = prod.push(block(2, 1, 0.0)).unwrap_err();
        assert_eq!(rejected.position, 2);
    }

    #[test]
    fn test_clear_drops_partial_block() {
        let (mut prod, mut cons) = block_ring(4);
        prod.push(block(0, 100, 0.5)).unwrap();
        prod.push(block(100, 100, 0.5)).unwrap();
        cons.read_into(10, |_, _| {});
        assert!(!cons.is_empty());

        cons.clear();
        assert!(cons.is_empty());
        assert_eq!(cons.read_into(10, |_, _| {}), 0);
        assert_eq!(prod.vacant_blocks(), 4);
    }

    #[test]
    fn test_blocks_for_frames() {
        assert_eq!(blocks_for_frames(0), 2);
        assert_eq!(blocks_for_frames(8192), 16);
        assert_eq!(blocks_for_frames(8193), 17);
    }
}
