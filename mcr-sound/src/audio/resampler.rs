//! Streaming sample-rate conversion using rubato
//!
//! Wraps a reader whose rate differs from the engine rate. Input is pulled in
//! the chunk sizes rubato asks for; output is queued and handed out in
//! whatever sizes the caller reads. Source positions are reported in the
//! output rate so every stage above sees one consistent time base.
//!
//! Input is tracked as runs of consecutive source frames, so a jump in the
//! wrapped reader (a loop restart) shows up in the reported position once
//! the output reaches it. Reads stop at such a jump.

use crate::error::{Error, Result};
use crate::reader::{Property, ReadError, SeekResult, SoundReader};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames per resampler chunk
const CHUNK_FRAMES: usize = 1024;

/// Start of a run of consecutive source frames in the input stream
#[derive(Debug, Clone, Copy, PartialEq)]
struct InputRun {
    /// Input frames fed to the resampler before this run
    index: i64,
    /// Source frame of the run's first input frame
    source: i64,
}

/// Sample-rate converting reader
pub struct ResampleReader {
    inner: Box<dyn SoundReader>,
    resampler: FastFixedIn<f32>,
    channels: usize,
    in_rate: u32,
    out_rate: u32,

    /// Planar input waiting for a full chunk
    input: Vec<Vec<f32>>,
    /// Interleaved scratch for reads from `inner`
    scratch: Vec<f32>,

    /// Interleaved output not yet returned
    output: Vec<f32>,
    output_pos: usize,

    /// Leading output frames to discard (filter delay)
    skip: usize,
    delay: usize,

    /// Source runs not yet fully played out, ascending by index
    runs: Vec<InputRun>,
    /// Input frames taken from `inner` since the last seek
    fed: i64,
    /// Output frames produced before `output[0]` since the last seek
    out_base: i64,

    inner_eof: bool,
    flushed: bool,
}

impl ResampleReader {
    /// Convert `inner` to `out_rate`
    pub fn new(inner: Box<dyn SoundReader>, out_rate: u32) -> Result<Self> {
        let in_rate = inner.sample_rate().max(1);
        let channels = inner.num_channels().max(1);

        debug!(
            "Resampling from {}Hz to {}Hz ({} channels)",
            in_rate, out_rate, channels
        );

        let resampler = FastFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

        let delay = resampler.output_delay();

        Ok(Self {
            inner,
            resampler,
            channels,
            in_rate,
            out_rate,
            input: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            scratch: vec![0.0; CHUNK_FRAMES * channels],
            output: Vec::new(),
            output_pos: 0,
            skip: delay,
            delay,
            runs: Vec::new(),
            fed: 0,
            out_base: 0,
            inner_eof: false,
            flushed: false,
        })
    }

    fn to_output_rate(&self, frames: i64) -> i64 {
        (frames as f64 * self.out_rate as f64 / self.in_rate as f64).round() as i64
    }

    fn to_input_rate(&self, frames: i64) -> i64 {
        (frames as f64 * self.in_rate as f64 / self.out_rate as f64).round() as i64
    }

    fn queued_frames(&self) -> usize {
        self.output.len() / self.channels - self.output_pos
    }

    fn ratio(&self) -> f64 {
        self.out_rate as f64 / self.in_rate as f64
    }

    /// Output frames produced since the last seek, skipped ones included
    fn output_index(&self) -> i64 {
        self.out_base + self.output_pos as i64
    }

    /// Input position heard at output frame `index`
    fn input_at(&self, index: i64) -> f64 {
        (index - self.delay as i64) as f64 / self.ratio()
    }

    /// Source frame, in the output rate, of output frame `index`
    fn source_at(&self, index: i64) -> Option<f64> {
        let at = self.input_at(index);
        let run = self
            .runs
            .iter()
            .rev()
            .find(|run| run.index as f64 <= at)
            .or_else(|| self.runs.first())?;
        Some((run.source as f64 + at - run.index as f64) * self.ratio())
    }

    /// Output frames left before the next source jump
    fn frames_to_jump(&self, index: i64) -> Option<usize> {
        let at = self.input_at(index);
        let next = self.runs.iter().find(|run| run.index as f64 > at)?;
        let boundary = (next.index as f64 * self.ratio()).ceil() as i64 + self.delay as i64;
        Some((boundary - index).max(0) as usize)
    }

    fn record_run(&mut self, source: i64) {
        let continues = self
            .runs
            .last()
            .is_some_and(|run| run.source + (self.fed - run.index) == source);
        if !continues {
            self.runs.push(InputRun {
                index: self.fed,
                source,
            });
        }
    }

    /// Drop runs the output has moved past
    fn trim_runs(&mut self) {
        let at = self.input_at(self.output_index());
        let passed = self
            .runs
            .iter()
            .skip(1)
            .take_while(|run| run.index as f64 <= at)
            .count();
        self.runs.drain(..passed);
    }

    /// Pull input until `frames` planar frames are waiting or the source ends
    fn fill_input(&mut self, frames: usize) -> std::result::Result<(), ReadError> {
        while self.input[0].len() < frames && !self.inner_eof {
            let want = (frames - self.input[0].len()).min(CHUNK_FRAMES);
            let source = self.inner.next_source_frame();
            match self.inner.read(&mut self.scratch, want) {
                Ok(n) => {
                    if n > 0 {
                        self.record_run(source);
                    }
                    deinterleave_into(&self.scratch[..n * self.channels], &mut self.input);
                    self.fed += n as i64;
                }
                Err(ReadError::EndOfFile) => self.inner_eof = true,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Run one resampler pass and queue its output
    fn produce(&mut self) -> std::result::Result<(), ReadError> {
        self.trim_runs();
        let need = self.resampler.input_frames_next();
        self.fill_input(need)?;

        let planar = if self.input[0].len() >= need {
            let out = self.resampler.process(&self.input, None);
            for ch in &mut self.input {
                ch.drain(..need);
            }
            out
        } else {
            // Source ended: push the remainder, then flush the filter delay
            self.flushed = true;
            let remaining = self.input[0].len();
            let mut out = self
                .resampler
                .process_partial(Some(self.input.as_slice()), None);
            for ch in &mut self.input {
                ch.clear();
            }
            if let Ok(head) = out.as_mut() {
                if let Ok(tail) = self.resampler.process_partial(None::<&[Vec<f32>]>, None) {
                    for (h, t) in head.iter_mut().zip(tail) {
                        h.extend_from_slice(&t);
                    }
                }
                // Partial passes are zero-padded; keep only the real tail
                let ratio = self.out_rate as f64 / self.in_rate as f64;
                let keep = (remaining as f64 * ratio).round() as usize + self.resampler.output_delay();
                for ch in head.iter_mut() {
                    ch.truncate(keep);
                }
            }
            out
        };

        let planar = planar.map_err(|e| {
            debug!("Resampler failed: {}", e);
            ReadError::Error
        })?;

        self.out_base += (self.output.len() / self.channels) as i64;
        self.output.clear();
        self.output_pos = 0;
        interleave_into(&planar, &mut self.output);

        if self.skip > 0 {
            let dropped = self.skip.min(self.queued_frames());
            self.output_pos = dropped;
            self.skip -= dropped;
        }
        Ok(())
    }
}

impl SoundReader for ResampleReader {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> std::result::Result<usize, ReadError> {
        let ch = self.channels;
        let frames = frames.min(buf.len() / ch);
        let mut produced = 0;

        while produced < frames {
            if self.queued_frames() == 0 {
                if self.flushed {
                    break;
                }
                match self.produce() {
                    Ok(()) => continue,
                    Err(e) if produced == 0 => return Err(e),
                    Err(_) => break,
                }
            }

            let mut n = self.queued_frames().min(frames - produced);
            let jump = self
                .frames_to_jump(self.output_index())
                .filter(|&room| room > 0);
            if let Some(room) = jump {
                n = n.min(room);
            }
            let start = self.output_pos * ch;
            buf[produced * ch..(produced + n) * ch]
                .copy_from_slice(&self.output[start..start + n * ch]);
            self.output_pos += n;
            produced += n;

            if jump == Some(n) {
                break;
            }
        }

        if produced == 0 && self.flushed {
            return Err(ReadError::EndOfFile);
        }
        Ok(produced)
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        self.resampler.reset();
        for ch in &mut self.input {
            ch.clear();
        }
        self.output.clear();
        self.output_pos = 0;
        self.skip = self.delay;
        self.runs.clear();
        self.fed = 0;
        self.out_base = 0;
        self.inner_eof = false;
        self.flushed = false;

        self.inner.set_position(self.to_input_rate(frame))
    }

    fn sample_rate(&self) -> u32 {
        self.out_rate
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn next_source_frame(&self) -> i64 {
        match self.source_at(self.output_index()) {
            Some(source) => (source.round() as i64).max(0),
            None => self.to_output_rate(self.inner.next_source_frame()),
        }
    }

    fn stream_to_source_ratio(&self) -> f64 {
        self.inner.stream_to_source_ratio()
    }

    fn length_frames(&self) -> Option<i64> {
        self.inner.length_frames().map(|len| self.to_output_rate(len))
    }

    fn error(&self) -> Option<String> {
        self.inner.error()
    }

    fn set_property(&mut self, property: &Property) -> bool {
        // Time-valued properties are in seconds, so they pass through unchanged
        self.inner.set_property(property)
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        let inner = self.inner.try_clone()?;
        ResampleReader::new(inner, self.out_rate)
            .ok()
            .map(|r| Box::new(r) as Box<dyn SoundReader>)
    }
}

/// Append interleaved samples to per-channel vectors
fn deinterleave_into(samples: &[f32], planar: &mut [Vec<f32>]) {
    let channels = planar.len();
    for frame in samples.chunks_exact(channels) {
        for (ch, s) in planar.iter_mut().zip(frame) {
            ch.push(*s);
        }
    }
}

/// Append per-channel vectors to an interleaved buffer
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let Some(frames) = planar.iter().map(Vec::len).min() else {
        return;
    };
    out.reserve(frames * planar.len());
    for i in 0..frames {
        for ch in planar {
            out.push(ch[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryReader;

    fn sine(frames: usize, rate: u32) -> Box<dyn SoundReader> {
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5;
            samples.push(s);
            samples.push(s);
        }
        Box::new(MemoryReader::new(samples, rate, 2))
    }

    fn read_all(reader: &mut dyn SoundReader) -> usize {
        let mut buf = vec![0.0f32; 700 * 2];
        let mut total = 0;
        loop {
            match reader.read(&mut buf, 700) {
                Ok(n) => total += n,
                Err(ReadError::EndOfFile) => break,
                Err(e) => panic!("unexpected {:?}", e),
            }
        }
        total
    }

    #[test]
    fn test_deinterleave_and_interleave() {
        let mut planar = vec![Vec::new(), Vec::new()];
        deinterleave_into(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &mut planar);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);

        let mut out = Vec::new();
        interleave_into(&planar, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_output_length_follows_ratio() {
        let mut reader = ResampleReader::new(sine(48_000, 48_000), 44_100).unwrap();
        assert_eq!(reader.sample_rate(), 44_100);
        assert_eq!(reader.length_frames(), Some(44_100));

        let total = read_all(&mut reader);
        assert!(
            (total as i64 - 44_100).abs() < 256,
            "expected ~44100 frames, got {}",
            total
        );
    }

    #[test]
    fn test_position_is_in_output_rate() {
        let mut reader = ResampleReader::new(sine(22_050, 22_050), 44_100).unwrap();
        let mut buf = vec![0.0f32; 1000 * 2];
        let n = reader.read(&mut buf, 1000).unwrap();
        assert_eq!(reader.next_source_frame(), n as i64);

        assert_eq!(reader.set_position(10_000), SeekResult::Ok);
        assert_eq!(reader.next_source_frame(), 10_000);
    }

    #[test]
    fn test_loop_restart_reaches_position() {
        use crate::reader::{EnvelopeReader, StopMode};

        let mut looped = EnvelopeReader::new(sine(300, 22_050));
        looped.set_property(&Property::StopMode(StopMode::Loop));
        let mut reader = ResampleReader::new(Box::new(looped), 44_100).unwrap();

        let mut buf = vec![0.0f32; 100 * 2];
        let mut previous = 0;
        let mut wraps = 0;
        for _ in 0..100 {
            reader.read(&mut buf, 100).unwrap();
            let position = reader.next_source_frame();
            assert!((0..=600).contains(&position), "position {} outside the file", position);
            if position < previous {
                wraps += 1;
            }
            previous = position;
        }
        assert!(wraps >= 5, "only {} restarts seen", wraps);
    }
}
