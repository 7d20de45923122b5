//! In-memory reader over shared decoded samples
//!
//! Precached sounds are decoded once into an `Arc<[f32]>`; every copy of the
//! sound reads the same allocation with its own cursor.

use super::{ReadError, SeekResult, SoundReader};
use std::sync::Arc;

/// Reader over interleaved samples held in memory
#[derive(Debug, Clone)]
pub struct MemoryReader {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: usize,
    /// Next frame to read
    position: usize,
}

impl MemoryReader {
    /// Wrap interleaved samples; a trailing partial frame is ignored
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, channels: usize) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            position: 0,
        }
    }

    /// Zero-length stereo reader used when a sound fails to load
    pub fn silent(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate, 2)
    }

    /// Decode everything `reader` produces into memory
    ///
    /// `WouldBlock` results are retried; a read error stops decoding and
    /// returns the reader's message.
    pub fn from_reader(reader: &mut dyn SoundReader) -> Result<Self, String> {
        let channels = reader.num_channels().max(1);
        let chunk = 4096;
        let mut buf = vec![0.0f32; chunk * channels];
        let mut samples = Vec::new();

        loop {
            match super::read_retrying(reader, &mut buf, chunk) {
                Ok(n) => samples.extend_from_slice(&buf[..n * channels]),
                Err(ReadError::EndOfFile) => break,
                Err(ReadError::WouldBlock) => continue,
                Err(ReadError::Error) => {
                    return Err(reader.error().unwrap_or_else(|| "read error".to_string()));
                }
            }
        }

        Ok(Self::new(samples, reader.sample_rate(), channels))
    }

    /// Total frames held
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// True if both readers share one sample allocation
    pub fn shares_data_with(&self, other: &MemoryReader) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

impl SoundReader for MemoryReader {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        let remaining = self.frames().saturating_sub(self.position);
        if remaining == 0 {
            return Err(ReadError::EndOfFile);
        }

        let n = remaining.min(frames).min(buf.len() / self.channels);
        let start = self.position * self.channels;
        let len = n * self.channels;
        buf[..len].copy_from_slice(&self.samples[start..start + len]);
        self.position += n;
        Ok(n)
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        let total = self.frames();
        let target = frame.max(0) as usize;
        if target > total {
            self.position = total;
            return SeekResult::PastEnd;
        }
        self.position = target;
        SeekResult::Ok
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn next_source_frame(&self) -> i64 {
        self.position as i64
    }

    fn length_frames(&self) -> Option<i64> {
        Some(self.frames() as i64)
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        let mut copy = self.clone();
        copy.position = 0;
        Some(Box::new(copy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_and_reports_eof() {
        let mut reader = MemoryReader::new(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 48_000, 2);
        let mut buf = [0.0f32; 4];
        assert_eq!(reader.read(&mut buf, 2), Ok(2));
        assert_eq!(buf, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(reader.next_source_frame(), 2);
        assert_eq!(reader.read(&mut buf, 2), Ok(1));
        assert_eq!(reader.read(&mut buf, 2), Err(ReadError::EndOfFile));
    }

    #[test]
    fn test_seek_past_end() {
        let mut reader = MemoryReader::new(vec![0.0; 20], 44_100, 2);
        assert_eq!(reader.set_position(5), SeekResult::Ok);
        assert_eq!(reader.set_position(11), SeekResult::PastEnd);
        let mut buf = [0.0f32; 4];
        assert_eq!(reader.read(&mut buf, 2), Err(ReadError::EndOfFile));
    }

    #[test]
    fn test_silent_reader_is_empty() {
        let mut reader = MemoryReader::silent(44_100);
        assert_eq!(reader.length_frames(), Some(0));
        let mut buf = [0.0f32; 4];
        assert_eq!(reader.read(&mut buf, 2), Err(ReadError::EndOfFile));
    }

    #[test]
    fn test_clones_share_samples() {
        let a = MemoryReader::new(vec![0.5; 64], 44_100, 1);
        let b = a.clone();
        assert!(a.shares_data_with(&b));
    }
}
