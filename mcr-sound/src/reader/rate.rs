//! Playback rate control (pitch and speed)
//!
//! Both pitch and speed are applied as varispeed: the stream is resampled by
//! `pitch * speed` with linear interpolation, so pitch and tempo move
//! together. Source position advances by that factor per output frame.
//!
//! Pending input is tracked as runs of consecutive source frames. A jump in
//! the wrapped reader's position (a loop restart) starts a new run, and a
//! read never returns frames from two runs, so the position reported before
//! each read is the source frame of its first output frame.

use super::{Property, ReadError, SeekResult, SoundReader};

/// Input frames pulled from the wrapped reader per refill
const CHUNK_FRAMES: usize = 1024;

/// Accepted range for pitch and speed factors
const MIN_FACTOR: f64 = 0.05;
const MAX_FACTOR: f64 = 8.0;

/// Start of a run of consecutive source frames within the pending input
#[derive(Debug, Clone, Copy, PartialEq)]
struct SourceRun {
    /// Input frame index where the run begins
    index: usize,
    /// Source frame of that input frame
    source: i64,
}

/// Varispeed reader
pub struct RateReader {
    inner: Box<dyn SoundReader>,
    channels: usize,
    pitch: f64,
    speed: f64,

    /// Pending input frames, interleaved
    input: Vec<f32>,

    /// Ascending by index; the first run starts at index 0
    runs: Vec<SourceRun>,

    /// Fractional read position within `input`, in frames
    phase: f64,

    inner_eof: bool,
}

impl RateReader {
    pub fn new(inner: Box<dyn SoundReader>) -> Self {
        let channels = inner.num_channels().max(1);
        Self {
            inner,
            channels,
            pitch: 1.0,
            speed: 1.0,
            input: Vec::with_capacity((CHUNK_FRAMES + 2) * channels),
            runs: Vec::new(),
            phase: 0.0,
            inner_eof: false,
        }
    }

    /// Combined rate factor
    pub fn rate(&self) -> f64 {
        self.pitch * self.speed
    }

    fn input_frames(&self) -> usize {
        self.input.len() / self.channels
    }

    fn is_passthrough(&self) -> bool {
        self.rate() == 1.0 && self.input.is_empty()
    }

    /// Source frame at a fractional input position
    fn source_at(&self, phase: f64) -> Option<f64> {
        let run = self
            .runs
            .iter()
            .rev()
            .find(|run| run.index as f64 <= phase)
            .or_else(|| self.runs.first())?;
        Some(run.source as f64 + (phase - run.index as f64))
    }

    /// Input index where the run after the one holding `phase` begins
    fn next_run_start(&self) -> usize {
        let idx = self.phase.floor() as usize;
        self.runs
            .iter()
            .map(|run| run.index)
            .find(|&start| start > idx)
            .unwrap_or(usize::MAX)
    }

    /// Forget `consumed` input frames
    fn drop_consumed(&mut self, consumed: usize) {
        self.input.drain(..consumed * self.channels);
        self.phase -= consumed as f64;

        for run in &mut self.runs {
            if run.index >= consumed {
                run.index -= consumed;
            } else {
                run.source += (consumed - run.index) as i64;
                run.index = 0;
            }
        }
        // Runs squeezed to index 0 are superseded by the last of them
        if let Some(live) = self.runs.iter().rposition(|run| run.index == 0) {
            self.runs.drain(..live);
        }
        if self.input.is_empty() {
            self.runs.clear();
        }
    }

    /// Drop consumed input and pull another chunk; returns false at EOF or block
    fn refill(&mut self) -> Result<bool, ReadError> {
        if self.inner_eof {
            return Ok(false);
        }

        let consumed = (self.phase.floor() as usize).min(self.input_frames());
        self.drop_consumed(consumed);

        let have = self.input.len();
        let index = self.input_frames();
        let source = self.inner.next_source_frame();
        self.input.resize(have + CHUNK_FRAMES * self.channels, 0.0);
        match self.inner.read(&mut self.input[have..], CHUNK_FRAMES) {
            Ok(n) => {
                self.input.truncate(have + n * self.channels);
                if n > 0 {
                    let continues = self
                        .runs
                        .last()
                        .is_some_and(|run| run.source + (index - run.index) as i64 == source);
                    if !continues {
                        self.runs.push(SourceRun { index, source });
                    }
                }
                Ok(n > 0)
            }
            Err(ReadError::EndOfFile) => {
                self.input.truncate(have);
                self.inner_eof = true;
                Ok(false)
            }
            Err(e) => {
                self.input.truncate(have);
                Err(e)
            }
        }
    }
}

impl SoundReader for RateReader {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        let frames = frames.min(buf.len() / self.channels);

        if self.is_passthrough() {
            return self.inner.read(buf, frames);
        }

        let rate = self.rate();
        let ch = self.channels;
        let mut out = 0;
        let mut run_end = self.next_run_start();

        while out < frames {
            let idx = self.phase.floor() as usize;
            if idx + 1 >= self.input_frames() {
                match self.refill() {
                    Ok(true) => {
                        run_end = self.next_run_start();
                        continue;
                    }
                    Ok(false) => break,
                    Err(e) if out == 0 => return Err(e),
                    Err(_) => break,
                }
            }

            if idx >= run_end {
                if out > 0 {
                    break;
                }
                run_end = self.next_run_start();
            }

            let t = (self.phase - idx as f64) as f32;
            let a = &self.input[idx * ch..(idx + 1) * ch];
            let b = &self.input[(idx + 1) * ch..(idx + 2) * ch];
            for c in 0..ch {
                buf[out * ch + c] = a[c] + (b[c] - a[c]) * t;
            }

            self.phase += rate;
            out += 1;
        }

        if out == 0 && self.inner_eof {
            return Err(ReadError::EndOfFile);
        }
        Ok(out)
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        self.input.clear();
        self.runs.clear();
        self.phase = 0.0;
        self.inner_eof = false;
        self.inner.set_position(frame)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn next_source_frame(&self) -> i64 {
        if self.input.is_empty() {
            return self.inner.next_source_frame();
        }
        match self.source_at(self.phase) {
            Some(source) => source.round() as i64,
            None => self.inner.next_source_frame(),
        }
    }

    fn stream_to_source_ratio(&self) -> f64 {
        self.inner.stream_to_source_ratio() * self.rate()
    }

    fn length_frames(&self) -> Option<i64> {
        self.inner.length_frames()
    }

    fn error(&self) -> Option<String> {
        self.inner.error()
    }

    fn set_property(&mut self, property: &Property) -> bool {
        match *property {
            Property::Pitch(p) => self.pitch = p.clamp(MIN_FACTOR, MAX_FACTOR),
            Property::Speed(s) => self.speed = s.clamp(MIN_FACTOR, MAX_FACTOR),
            _ => return self.inner.set_property(property),
        }
        true
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        let mut copy = RateReader::new(self.inner.try_clone()?);
        copy.pitch = self.pitch;
        copy.speed = self.speed;
        Some(Box::new(copy))
    }
}
