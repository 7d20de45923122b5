//! Streaming audio decoder using symphonia
//!
//! Packets are decoded on demand as the reader is pulled, so memory use is
//! bounded by one packet regardless of file length. Seeking uses symphonia's
//! accurate seek and then decodes and discards up to the requested frame.
//! Formats that cannot seek fall back to reopening the file and skipping
//! from the start.

use crate::error::{Error, Result};
use crate::reader::{MemoryReader, ReadError, SeekResult, SoundReader};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, error, warn};

/// Decoder over one audio file
///
/// Output is interleaved f32 with one or two channels. Files with more than
/// two channels are reduced to their front left and right channels.
pub struct StreamDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    src_channels: usize,
    channels: usize,
    length: Option<i64>,

    /// Decoded frames not yet returned, interleaved at `channels`
    pending: Vec<f32>,
    pending_pos: usize,
    sample_buf: Option<SampleBuffer<f32>>,

    /// Next frame `read` returns
    position: i64,

    /// Frames still to discard after a seek
    skip: i64,

    eof: bool,
    last_error: Option<String>,
}

impl StreamDecoder {
    /// Open `path` and prepare its first audio track for decoding
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening audio file: {}", path.display());

        let file = File::open(path)
            .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe {}: {}", path.display(), e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode(format!("No audio track in {}", path.display())))?;

        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
        let src_channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;
        if src_channels == 0 {
            return Err(Error::Decode("Track has no channels".to_string()));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        debug!(
            "Audio format: sample_rate={}, channels={}, frames={:?}",
            sample_rate, src_channels, params.n_frames
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            time_base: params.time_base,
            sample_rate,
            src_channels,
            channels: src_channels.min(2),
            length: params.n_frames.map(|n| n as i64),
            pending: Vec::new(),
            pending_pos: 0,
            sample_buf: None,
            position: 0,
            skip: 0,
            eof: false,
            last_error: None,
        })
    }

    /// Decode the whole file into memory
    pub fn decode_all(path: impl AsRef<Path>) -> Result<MemoryReader> {
        let mut decoder = Self::open(path)?;
        MemoryReader::from_reader(&mut decoder).map_err(Error::Decode)
    }

    /// File this decoder reads
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    fn fail(&mut self, msg: String) -> ReadError {
        error!("{}: {}", self.path.display(), msg);
        self.last_error = Some(msg);
        ReadError::Error
    }

    /// Decode packets until one yields audio; Ok(false) at end of stream
    fn decode_packet(&mut self) -> std::result::Result<bool, ReadError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Reached end of {}", self.path.display());
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(self.fail(format!("Failed to read packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error in packet, skipping: {}", e);
                    continue;
                }
                Err(e) => return Err(self.fail(format!("Decoder failed: {}", e))),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needed = capacity as usize * spec.channels.count();
            if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                self.sample_buf = Some(SampleBuffer::<f32>::new(capacity, spec));
            }
            let Some(sample_buf) = self.sample_buf.as_mut() else {
                continue;
            };
            sample_buf.copy_interleaved_ref(decoded);
            let samples = sample_buf.samples();

            self.pending.clear();
            self.pending_pos = 0;
            let src = spec.channels.count().max(1);
            if src == self.channels {
                self.pending.extend_from_slice(samples);
            } else {
                // Keep the front left/right pair
                for frame in samples.chunks_exact(src) {
                    self.pending.extend_from_slice(&frame[..self.channels]);
                }
            }

            if self.skip > 0 {
                let dropped = (self.skip as usize).min(self.pending_frames());
                self.pending_pos = dropped;
                self.skip -= dropped as i64;
            }
            return Ok(true);
        }
    }

    fn frames_for_ts(&self, ts: u64) -> i64 {
        match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(ts);
                (t.seconds as f64 * self.sample_rate as f64 + t.frac * self.sample_rate as f64)
                    .round() as i64
            }
            None => ts as i64,
        }
    }

    fn reset_buffers(&mut self) {
        self.pending.clear();
        self.pending_pos = 0;
        self.eof = false;
    }

    /// Reopen from the start and discard `frame` frames
    fn seek_by_reopening(&mut self, frame: i64) -> SeekResult {
        match Self::open(&self.path) {
            Ok(fresh) => {
                self.format = fresh.format;
                self.decoder = fresh.decoder;
                self.reset_buffers();
                self.skip = frame;
                self.position = frame;
                SeekResult::Ok
            }
            Err(e) => {
                self.fail(format!("Seek failed: {}", e));
                SeekResult::Error
            }
        }
    }
}

impl SoundReader for StreamDecoder {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> std::result::Result<usize, ReadError> {
        let ch = self.channels;
        let frames = frames.min(buf.len() / ch);
        let mut produced = 0;

        while produced < frames {
            if self.pending_pos >= self.pending_frames() {
                if self.eof {
                    break;
                }
                match self.decode_packet() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.eof = true;
                        break;
                    }
                    Err(e) if produced == 0 => return Err(e),
                    Err(_) => break,
                }
            }

            let n = (self.pending_frames() - self.pending_pos).min(frames - produced);
            let src = &self.pending[self.pending_pos * ch..(self.pending_pos + n) * ch];
            buf[produced * ch..(produced + n) * ch].copy_from_slice(src);
            self.pending_pos += n;
            produced += n;
        }

        self.position += produced as i64;
        if produced == 0 && self.eof {
            return Err(ReadError::EndOfFile);
        }
        Ok(produced)
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        let frame = frame.max(0);
        if let Some(len) = self.length {
            if frame > len {
                warn!(
                    "Seek to frame {} past end of {} ({} frames)",
                    frame,
                    self.path.display(),
                    len
                );
                self.reset_buffers();
                self.eof = true;
                self.position = len;
                return SeekResult::PastEnd;
            }
        }

        if frame == self.position && self.skip == 0 {
            return SeekResult::Ok;
        }

        let seconds = frame as f64 / self.sample_rate as f64;
        let target = SeekTo::Time {
            time: Time::from(seconds),
            track_id: Some(self.track_id),
        };
        match self.format.seek(SeekMode::Accurate, target) {
            Ok(seeked) => {
                self.decoder.reset();
                self.reset_buffers();
                let landed = self.frames_for_ts(seeked.actual_ts);
                self.skip = (frame - landed).max(0);
                self.position = frame;
                SeekResult::Ok
            }
            Err(e) => {
                debug!("Accurate seek failed ({}), reopening {}", e, self.path.display());
                self.seek_by_reopening(frame)
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn next_source_frame(&self) -> i64 {
        self.position
    }

    fn length_frames(&self) -> Option<i64> {
        self.length
    }

    fn error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        match Self::open(&self.path) {
            Ok(copy) => Some(Box::new(copy)),
            Err(e) => {
                warn!("Failed to reopen {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("path", &self.path)
            .field("sample_rate", &self.sample_rate)
            .field("src_channels", &self.src_channels)
            .field("position", &self.position)
            .finish()
    }
}
