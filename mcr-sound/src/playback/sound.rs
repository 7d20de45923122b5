//! Playback handle
//!
//! A [`Sound`] owns one reader chain and plays it through the engine. Playing
//! a sound that is already playing starts an independent copy that lives
//! only as long as its voice.

use super::engine::MixingEngine;
use super::params::SoundParams;
use super::ring_buffer::CHANNELS;
use super::voice::{BlockRead, FinishInfo, MixSource, StartOptions, VoiceHandle};
use crate::error::Result;
use crate::reader::{
    factory, open_reader, read_from_origin, MemoryReader, Property, ReadError, SeekResult,
    SoundReader,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

/// Position report from [`Sound::position`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackPosition {
    pub seconds: f64,
    /// The voice has not been mixed yet; `seconds` is where it will start
    pub approximate: bool,
    /// When the position was sampled
    pub timestamp: Instant,
}

#[derive(Debug, Default)]
struct SourceStatus {
    finished: bool,
    final_frame: i64,
    error: Option<String>,
}

/// Reader attached to a voice
struct ReaderSource {
    reader: Mutex<Box<dyn SoundReader>>,
    status: Mutex<SourceStatus>,
}

impl ReaderSource {
    fn new(reader: Box<dyn SoundReader>) -> Self {
        Self {
            reader: Mutex::new(reader),
            status: Mutex::new(SourceStatus::default()),
        }
    }

    fn reader(&self) -> MutexGuard<'_, Box<dyn SoundReader>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> MutexGuard<'_, SourceStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_status(&self) {
        *self.status() = SourceStatus::default();
    }
}

impl MixSource for ReaderSource {
    fn read_block(&self, buf: &mut [f32], frames: usize) -> std::result::Result<BlockRead, ReadError> {
        let frames = frames.min(buf.len() / CHANNELS);
        let mut reader = self.reader();

        let block = match reader.num_channels() {
            CHANNELS => read_from_origin(&mut *reader, buf, frames)?,
            1 => {
                let block = read_from_origin(&mut *reader, &mut buf[..frames], frames)?;
                // Expand in place from the back
                for i in (0..block.frames).rev() {
                    let s = buf[i];
                    buf[2 * i + 1] = s;
                    buf[2 * i] = s;
                }
                block
            }
            other => {
                self.status().error = Some(format!("cannot play {}-channel audio", other));
                return Err(ReadError::Error);
            }
        };

        Ok(BlockRead {
            frames: block.frames,
            source_frame: block.source_frame,
            ratio: block.ratio,
        })
    }

    fn error(&self) -> Option<String> {
        let stored = self.status().error.clone();
        stored.or_else(|| self.reader().error())
    }

    fn finished(&self, info: FinishInfo) {
        let mut status = self.status();
        status.finished = true;
        status.final_frame = info.source_frame;
        if info.error.is_some() {
            status.error = info.error;
        }
    }
}

/// Loadable, playable sound
pub struct Sound {
    engine: Arc<MixingEngine>,
    name: String,
    path: Option<PathBuf>,

    /// None until something is loaded
    source: Option<Arc<ReaderSource>>,
    sample_rate: u32,
    params: SoundParams,

    handle: Option<VoiceHandle>,

    /// Attract volume captured at the last play
    volume_scale: f64,

    /// Source frame the current voice started from
    play_start_frame: i64,
    stopped_frame: i64,
    /// Seek requested while stopped, applied at the next play
    seek_frame: Option<i64>,

    load_error: Option<String>,
}

impl Sound {
    pub fn new(engine: Arc<MixingEngine>) -> Self {
        let sample_rate = engine.sample_rate();
        Self {
            engine,
            name: String::new(),
            path: None,
            source: None,
            sample_rate,
            params: SoundParams::default(),
            handle: None,
            volume_scale: 1.0,
            play_start_frame: 0,
            stopped_frame: 0,
            seek_frame: None,
            load_error: None,
        }
    }

    /// Open `path` and build its reader chain
    ///
    /// On failure the sound is left loaded with silence, so later calls
    /// behave normally; the error is reported once through the engine and
    /// kept for [`Sound::error`].
    pub fn load(&mut self, path: &Path, precache: bool) -> Result<()> {
        self.stop();
        self.name = path.display().to_string();
        self.path = Some(path.to_path_buf());

        let options = self.engine.chain_options().with_precache(precache);
        let result = open_reader(path, &options);
        self.install_or_fallback(result)
    }

    /// Use an already-open reader, decorated the same way as a file
    pub fn load_reader(&mut self, reader: Box<dyn SoundReader>, name: &str) -> Result<()> {
        self.stop();
        self.name = name.to_string();
        self.path = None;

        let options = self.engine.chain_options();
        let result = factory::decorate(reader, &options);
        self.install_or_fallback(result)
    }

    fn install_or_fallback(&mut self, result: Result<Box<dyn SoundReader>>) -> Result<()> {
        match result {
            Ok(reader) => {
                debug!("Loaded {}", self.name);
                self.install(reader);
                self.load_error = None;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.engine.report_load_error(&self.name, &message);
                self.install(Box::new(MemoryReader::silent(self.engine.sample_rate())));
                self.load_error = Some(message);
                Err(e)
            }
        }
    }

    fn install(&mut self, mut reader: Box<dyn SoundReader>) {
        let stop_mode = self.params.resolved_stop_mode(&self.name);
        for property in self.params.properties(self.volume_scale, stop_mode) {
            reader.set_property(&property);
        }
        self.sample_rate = reader.sample_rate();
        self.source = Some(Arc::new(ReaderSource::new(reader)));
        self.handle = None;
        self.play_start_frame = 0;
        self.stopped_frame = 0;
        self.seek_frame = None;
    }

    /// Start playing
    ///
    /// `is_action` marks interface feedback sounds, which are skipped when
    /// actions are muted. `override_params` replaces the stored parameters
    /// for this play only. Returns true if a voice started.
    pub fn play(&mut self, is_action: bool, override_params: Option<&SoundParams>) -> bool {
        let Some(source) = self.source.clone() else {
            debug!("Play ignored: no sound loaded");
            return false;
        };
        if is_action && self.engine.mute_actions() {
            debug!("Action sound {} muted", self.name);
            return false;
        }

        let params = override_params.unwrap_or(&self.params).clone();
        let volume_scale = self.engine.attract_volume() as f64;
        let properties = params.properties(volume_scale, params.resolved_stop_mode(&self.name));

        if self.is_playing() {
            let copy = source.reader().try_clone();
            let Some(mut copy) = copy else {
                warn!("{} cannot be played twice at once", self.name);
                return false;
            };
            for property in &properties {
                copy.set_property(property);
            }
            let copy: Arc<dyn MixSource> = Arc::new(ReaderSource::new(copy));
            return match self.engine.start_mixing(copy, StartOptions::default()) {
                Ok(_) => true,
                Err(e) => {
                    warn!("{}: sound did not play: {}", self.name, e);
                    false
                }
            };
        }

        self.volume_scale = volume_scale;
        let start = self.seek_frame.take().unwrap_or(0);
        {
            let mut reader = source.reader();
            for property in &properties {
                reader.set_property(property);
            }
            if reader.set_position(start) == SeekResult::Error {
                warn!("{}: seek to frame {} failed", self.name, start);
            }
            self.play_start_frame = reader.next_source_frame();
        }
        self.start_voice(source)
    }

    fn start_voice(&mut self, source: Arc<ReaderSource>) -> bool {
        source.reset_status();
        match self.engine.start_mixing(source, StartOptions::default()) {
            Ok(handle) => {
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                warn!("{}: sound did not play: {}", self.name, e);
                false
            }
        }
    }

    /// Stop playing, remembering the position reached
    pub fn stop(&mut self) {
        let frame = self.position_frame().0;
        if let Some(handle) = self.handle.take() {
            self.engine.stop_mixing(handle);
            self.stopped_frame = frame;
        }
    }

    /// Pause or resume; false when nothing is loaded or playing
    pub fn pause(&mut self, paused: bool) -> bool {
        if self.source.is_none() {
            return false;
        }
        match self.handle {
            Some(handle) => self.engine.pause_mixing(handle, paused),
            None => false,
        }
    }

    /// Replace all parameters, applying them to the playing chain
    pub fn set_params(&mut self, params: SoundParams) {
        self.params = params;
        if let Some(source) = self.source.as_ref() {
            let stop_mode = self.params.resolved_stop_mode(&self.name);
            let mut reader = source.reader();
            for property in self.params.properties(self.volume_scale, stop_mode) {
                reader.set_property(&property);
            }
        }
    }

    /// Set one parameter by name; false for unknown names or bad values
    pub fn set_property(&mut self, name: &str, value: &str) -> bool {
        let Some(property) = Property::parse(name, value) else {
            warn!("{}: unknown property {}={}", self.name, name, value);
            return false;
        };
        self.params.apply(&property);

        let scaled = match property {
            Property::Volume(v) => Property::Volume(v * self.volume_scale),
            other => other,
        };
        match self.source.as_ref() {
            Some(source) => {
                let handled = source.reader().set_property(&scaled);
                if !handled {
                    debug!("{}: {} not supported by this chain", self.name, name);
                }
                handled
            }
            None => true,
        }
    }

    /// Position in seconds and whether it is an estimate
    pub fn position(&self) -> PlaybackPosition {
        let (frame, approximate) = self.position_frame();
        PlaybackPosition {
            seconds: mcr_common::time::frames_to_seconds(frame, self.sample_rate),
            approximate,
            timestamp: Instant::now(),
        }
    }

    pub fn position_seconds(&self) -> f64 {
        self.position().seconds
    }

    fn position_frame(&self) -> (i64, bool) {
        if let (Some(handle), Some(source)) = (self.handle, self.source.as_ref()) {
            if self.engine.is_active(handle) {
                return match self.engine.source_position(handle) {
                    Some(frame) => (frame, false),
                    None => (self.play_start_frame, true),
                };
            }
            let status = source.status();
            if status.finished {
                return (status.final_frame, false);
            }
        }
        (self.seek_frame.unwrap_or(self.stopped_frame), false)
    }

    /// Seek; a playing sound restarts at the new position
    pub fn set_position_seconds(&mut self, seconds: f64) {
        let Some(source) = self.source.clone() else {
            return;
        };

        let mut frame = crate::reader::seconds_to_frames(seconds, self.sample_rate);
        if let Some(length) = source.reader().length_frames() {
            if frame > length {
                warn!(
                    "{}: seek to {:.3}s is past the end ({:.3}s), clamping",
                    self.name,
                    seconds,
                    mcr_common::time::frames_to_seconds(length, self.sample_rate)
                );
                frame = length;
            }
        }

        let Some(handle) = self.handle.take().filter(|h| self.engine.is_active(*h)) else {
            self.seek_frame = Some(frame);
            self.stopped_frame = frame;
            return;
        };

        self.engine.stop_mixing(handle);
        {
            let mut reader = source.reader();
            if reader.set_position(frame) == SeekResult::PastEnd {
                warn!("{}: seek target is past the end", self.name);
            }
            self.play_start_frame = reader.next_source_frame();
        }
        self.start_voice(source);
    }

    pub fn length_seconds(&self) -> Option<f64> {
        let source = self.source.as_ref()?;
        let length = source.reader().length_frames()?;
        Some(mcr_common::time::frames_to_seconds(length, self.sample_rate))
    }

    pub fn is_playing(&self) -> bool {
        self.handle.is_some_and(|h| self.engine.is_active(h))
    }

    /// Load or playback error, if any
    pub fn error(&self) -> Option<String> {
        if let Some(message) = self.load_error.as_ref() {
            return Some(message.clone());
        }
        self.source.as_ref().and_then(|s| s.status().error.clone())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &SoundParams {
        &self.params
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }
}

impl Drop for Sound {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.stop_mixing(handle);
        }
    }
}

impl std::fmt::Debug for Sound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sound")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("params", &self.params)
            .finish()
    }
}
