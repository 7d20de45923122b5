//! Volume, fades, play window and stop mode
//!
//! Positions handled here are absolute frames of the wrapped reader. The play
//! window runs from the start point to `start + length` (or the end of the
//! stream). Fade-in is measured from the start point, fade-out back from the
//! window end.

use super::{seconds_to_frames, Property, ReadError, SeekResult, SoundReader, StopMode};
use mcr_common::FadeCurve;
use tracing::{debug, trace};

/// Gain envelope and end-of-stream policy around another reader
pub struct EnvelopeReader {
    inner: Box<dyn SoundReader>,
    volume: f32,
    curve: FadeCurve,
    fade_in_frames: i64,
    fade_out_frames: i64,
    start_frame: i64,
    window_frames: Option<i64>,
    stop_mode: StopMode,

    /// Source frame of the next output frame
    position: i64,

    /// Past the end in `Continue` mode, emitting silence
    continuing: bool,

    /// Frames produced since the last loop restart
    since_restart: i64,
}

impl EnvelopeReader {
    pub fn new(inner: Box<dyn SoundReader>) -> Self {
        let position = inner.next_source_frame();
        Self {
            inner,
            volume: 1.0,
            curve: FadeCurve::default(),
            fade_in_frames: 0,
            fade_out_frames: 0,
            start_frame: 0,
            window_frames: None,
            stop_mode: StopMode::Stop,
            position,
            continuing: false,
            since_restart: 0,
        }
    }

    /// Use `curve` for both fades
    pub fn with_fade_curve(mut self, curve: FadeCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn stop_mode(&self) -> StopMode {
        self.stop_mode
    }

    pub fn set_stop_mode(&mut self, mode: StopMode) {
        self.stop_mode = mode;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Frame at which the play window ends, if known
    fn end_frame(&self) -> Option<i64> {
        let inner_end = self.inner.length_frames();
        match (self.window_frames, inner_end) {
            (Some(w), Some(len)) => Some((self.start_frame + w).min(len)),
            (Some(w), None) => Some(self.start_frame + w),
            (None, len) => len,
        }
    }

    fn gain_at(&self, frame: i64, end: Option<i64>) -> f32 {
        let mut gain = self.volume;

        if self.fade_in_frames > 0 {
            let into = frame - self.start_frame;
            if into < self.fade_in_frames {
                gain *= self.curve.fade_in(into as f32 / self.fade_in_frames as f32);
            }
        }

        if let (Some(end), true) = (end, self.fade_out_frames > 0) {
            let fade_start = end - self.fade_out_frames;
            if frame >= fade_start {
                gain *= self
                    .curve
                    .fade_out((frame - fade_start) as f32 / self.fade_out_frames as f32);
            }
        }

        gain
    }

    fn apply_gain(&self, buf: &mut [f32], frames: usize, first: i64) {
        let channels = self.inner.num_channels().max(1);
        let end = self.end_frame();
        let unity = self.volume == 1.0
            && self.fade_in_frames == 0
            && (self.fade_out_frames == 0 || end.is_none());
        if unity {
            return;
        }

        for (i, frame) in buf[..frames * channels].chunks_exact_mut(channels).enumerate() {
            let g = self.gain_at(first + i as i64, end);
            for s in frame {
                *s *= g;
            }
        }
    }

    fn fill_silence(&mut self, buf: &mut [f32], frames: usize) -> usize {
        let channels = self.inner.num_channels().max(1);
        let n = frames.min(buf.len() / channels);
        buf[..n * channels].fill(0.0);
        self.position += n as i64;
        n
    }

    /// End of the window reached inside a read
    ///
    /// A loop restart returns an empty read, so every non-empty read starts
    /// at the source frame reported before it.
    fn end_of_window(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        if !self.handle_end() {
            return Err(ReadError::EndOfFile);
        }
        if self.continuing {
            Ok(self.fill_silence(buf, frames))
        } else {
            Ok(0)
        }
    }

    /// Apply the stop mode at the end of the window; returns true to keep reading
    fn handle_end(&mut self) -> bool {
        match self.stop_mode {
            StopMode::Stop => false,
            StopMode::Continue => {
                if !self.continuing {
                    debug!("Stream ended at frame {}, continuing with silence", self.position);
                }
                self.continuing = true;
                true
            }
            StopMode::Loop => {
                if self.since_restart == 0 {
                    // Empty window, looping would spin forever
                    return false;
                }
                trace!("Looping back to frame {}", self.start_frame);
                if self.inner.set_position(self.start_frame) != SeekResult::Ok {
                    return false;
                }
                self.position = self.start_frame;
                self.since_restart = 0;
                true
            }
        }
    }
}

impl SoundReader for EnvelopeReader {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        if self.continuing {
            return Ok(self.fill_silence(buf, frames));
        }

        let end = self.end_frame();
        let mut want = frames;
        if let Some(end) = end {
            let left = end - self.position;
            if left <= 0 {
                return self.end_of_window(buf, frames);
            }
            want = want.min(left as usize);
        }

        match self.inner.read(buf, want) {
            Ok(got) => {
                self.apply_gain(buf, got, self.position);
                self.position += got as i64;
                self.since_restart += got as i64;
                if self.stop_mode == StopMode::Loop && end.is_some_and(|end| self.position >= end) {
                    // Wrap now so the reported source frame is already the start point
                    self.handle_end();
                }
                Ok(got)
            }
            Err(ReadError::EndOfFile) => self.end_of_window(buf, frames),
            Err(e) => Err(e),
        }
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        self.continuing = false;
        self.since_restart = 0;
        let frame = frame.max(self.start_frame);

        if let Some(end) = self.end_frame() {
            if frame > end {
                self.position = end;
                let _ = self.inner.set_position(end);
                return SeekResult::PastEnd;
            }
        }

        let result = self.inner.set_position(frame);
        if result != SeekResult::Error {
            self.position = if result == SeekResult::PastEnd {
                self.inner.next_source_frame()
            } else {
                frame
            };
        }
        result
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn num_channels(&self) -> usize {
        self.inner.num_channels()
    }

    fn next_source_frame(&self) -> i64 {
        self.position
    }

    fn stream_to_source_ratio(&self) -> f64 {
        self.inner.stream_to_source_ratio()
    }

    fn length_frames(&self) -> Option<i64> {
        self.end_frame()
    }

    fn error(&self) -> Option<String> {
        self.inner.error()
    }

    fn set_property(&mut self, property: &Property) -> bool {
        let rate = self.inner.sample_rate();
        match *property {
            Property::Volume(v) => self.volume = v.max(0.0) as f32,
            Property::FadeInSeconds(s) => self.fade_in_frames = seconds_to_frames(s, rate),
            Property::FadeOutSeconds(s) => self.fade_out_frames = seconds_to_frames(s, rate),
            Property::StopMode(mode) => self.stop_mode = mode,
            Property::StartSeconds(s) => {
                self.start_frame = seconds_to_frames(s, rate);
                if self.position < self.start_frame {
                    let _ = self.set_position(self.start_frame);
                }
            }
            Property::LengthSeconds(s) => {
                self.window_frames = (s > 0.0).then(|| seconds_to_frames(s, rate));
            }
            _ => return self.inner.set_property(property),
        }
        true
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        let mut copy = EnvelopeReader::new(self.inner.try_clone()?);
        copy.volume = self.volume;
        copy.curve = self.curve;
        copy.fade_in_frames = self.fade_in_frames;
        copy.fade_out_frames = self.fade_out_frames;
        copy.start_frame = self.start_frame;
        copy.window_frames = self.window_frames;
        copy.stop_mode = self.stop_mode;
        if copy.start_frame > 0 {
            let _ = copy.set_position(copy.start_frame);
        }
        Some(Box::new(copy))
    }
}
