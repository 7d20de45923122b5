//! Read-ahead buffering
//!
//! Pulls fixed-size chunks from the wrapped reader so the stages beneath it
//! run on large, regular reads regardless of how the engine slices its
//! requests. Position reporting accounts for frames held in the chunk.

use super::{Property, ReadError, SeekResult, SoundReader};

pub struct BufferedReader {
    inner: Box<dyn SoundReader>,
    channels: usize,
    chunk_frames: usize,
    chunk: Vec<f32>,
    filled: usize,
    cursor: usize,

    /// Source frame and ratio of the first frame in `chunk`
    chunk_source: i64,
    chunk_ratio: f64,
}

impl BufferedReader {
    pub fn new(inner: Box<dyn SoundReader>, chunk_frames: usize) -> Self {
        let channels = inner.num_channels().max(1);
        let chunk_frames = chunk_frames.max(1);
        Self {
            inner,
            channels,
            chunk_frames,
            chunk: vec![0.0; chunk_frames * channels],
            filled: 0,
            cursor: 0,
            chunk_source: 0,
            chunk_ratio: 1.0,
        }
    }

    /// Frames held and not yet returned
    pub fn buffered_frames(&self) -> usize {
        self.filled - self.cursor
    }

    fn refill(&mut self) -> Result<(), ReadError> {
        self.chunk_source = self.inner.next_source_frame();
        self.chunk_ratio = self.inner.stream_to_source_ratio();
        self.cursor = 0;
        self.filled = 0;
        self.filled = self.inner.read(&mut self.chunk, self.chunk_frames)?;
        Ok(())
    }

    fn discard(&mut self) {
        self.filled = 0;
        self.cursor = 0;
    }
}

impl SoundReader for BufferedReader {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        if self.buffered_frames() == 0 {
            self.refill()?;
        }

        let n = self
            .buffered_frames()
            .min(frames)
            .min(buf.len() / self.channels);
        let start = self.cursor * self.channels;
        buf[..n * self.channels].copy_from_slice(&self.chunk[start..start + n * self.channels]);
        self.cursor += n;
        Ok(n)
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        self.discard();
        self.inner.set_position(frame)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn next_source_frame(&self) -> i64 {
        if self.buffered_frames() > 0 {
            self.chunk_source + (self.cursor as f64 * self.chunk_ratio).round() as i64
        } else {
            self.inner.next_source_frame()
        }
    }

    fn stream_to_source_ratio(&self) -> f64 {
        if self.buffered_frames() > 0 {
            self.chunk_ratio
        } else {
            self.inner.stream_to_source_ratio()
        }
    }

    fn length_frames(&self) -> Option<i64> {
        self.inner.length_frames()
    }

    fn error(&self) -> Option<String> {
        self.inner.error()
    }

    fn set_property(&mut self, property: &Property) -> bool {
        self.inner.set_property(property)
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        Some(Box::new(BufferedReader::new(
            self.inner.try_clone()?,
            self.chunk_frames,
        )))
    }
}
