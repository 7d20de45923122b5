//! Sound chain compositor
//!
//! A chain plays several sub-sounds on one shared timeline, each starting at
//! its own millisecond offset and with its own pan. Loaded readers act as
//! templates: every scheduled sub-sound gets an independent copy, so one
//! sample can be scheduled many times.
//!
//! ```text
//! offset:  0ms        10ms              250ms
//!          [kick....]
//!                     [snare......]
//!                     [hat..]
//!                                       [crash...........]
//! ```
//!
//! Reads never cross the next pending offset, so a sub-sound always starts
//! on exactly its scheduled frame.

use super::{PanReader, Property, ReadError, SeekResult, SoundReader};
use crate::audio::accumulator::MixAccumulator;
use crate::audio::decoder::StreamDecoder;
use crate::audio::resampler::ResampleReader;
use crate::error::{Error, Result};
use mcr_common::time::millis_to_frames;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubState {
    Pending,
    Active,
    Finished,
}

/// One scheduled occurrence of a loaded reader
struct SubSound {
    index: usize,
    offset_ms: i64,
    pan: f32,
    offset_frames: i64,
    reader: Option<Box<dyn SoundReader>>,
    state: SubState,
}

/// Compositor mixing time-offset sub-sounds into one reader
pub struct SoundChain {
    sample_rate: u32,
    channels: usize,
    templates: Vec<Box<dyn SoundReader>>,
    subs: Vec<SubSound>,
    finished: bool,

    /// Chain frame of the next output frame
    position: i64,

    mix: MixAccumulator,
    scratch: Vec<f32>,
}

impl SoundChain {
    /// Create an empty chain producing audio at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: 1,
            templates: Vec::new(),
            subs: Vec::new(),
            finished: false,
            position: 0,
            mix: MixAccumulator::new(),
            scratch: Vec::new(),
        }
    }

    /// Decode `path` into memory and register it; returns its index
    pub fn add_sound(&mut self, path: &Path) -> Result<usize> {
        let memory = StreamDecoder::decode_all(path)?;
        Ok(self.add_reader(Box::new(memory)))
    }

    /// Register a reader; returns its index
    ///
    /// The reader must support `try_clone` to be scheduled.
    pub fn add_reader(&mut self, reader: Box<dyn SoundReader>) -> usize {
        self.templates.push(reader);
        self.templates.len() - 1
    }

    /// Schedule loaded reader `index` at `offset_ms` with `pan`
    pub fn add_sub_sound(&mut self, index: usize, offset_ms: i64, pan: f32) -> Result<()> {
        if index >= self.templates.len() {
            return Err(Error::InvalidState(format!(
                "No sound {} in chain ({} loaded)",
                index,
                self.templates.len()
            )));
        }
        if self.finished {
            return Err(Error::InvalidState("Chain already finished".to_string()));
        }

        self.subs.push(SubSound {
            index,
            offset_ms: offset_ms.max(0),
            pan: pan.clamp(-1.0, 1.0),
            offset_frames: 0,
            reader: None,
            state: SubState::Pending,
        });
        Ok(())
    }

    /// Number of scheduled sub-sounds still usable
    pub fn sub_sound_count(&self) -> usize {
        self.subs.len()
    }

    /// Fix the schedule, channel count and per-sub readers
    ///
    /// Sub-sounds with more than two channels, or whose reader cannot be
    /// copied, are dropped with a warning. Called automatically by the first
    /// read or seek.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let templates = &self.templates;
        self.subs.retain(|sub| {
            let channels = templates[sub.index].num_channels();
            if channels > 2 || channels == 0 {
                warn!("Dropping {}-channel sound {} from chain", channels, sub.index);
                return false;
            }
            true
        });
        self.subs.sort_by_key(|sub| sub.offset_ms);

        let stereo = self
            .subs
            .iter()
            .any(|sub| templates[sub.index].num_channels() == 2 || sub.pan != 0.0);
        self.channels = if stereo { 2 } else { 1 };

        for sub in &mut self.subs {
            sub.offset_frames = millis_to_frames(sub.offset_ms, self.sample_rate);
            sub.reader = prepare_reader(&*templates[sub.index], self.sample_rate, stereo, sub.pan);
        }

        let before = self.subs.len();
        self.subs.retain(|sub| sub.reader.is_some());
        if self.subs.len() != before {
            warn!("Dropped {} chain entries that could not be copied", before - self.subs.len());
        }

        debug!(
            "Chain finished: {} sub-sounds, {} channels, {}Hz",
            self.subs.len(),
            self.channels,
            self.sample_rate
        );
    }

    fn activate_reached(&mut self) {
        for sub in &mut self.subs {
            if sub.state == SubState::Pending && sub.offset_frames <= self.position {
                sub.state = SubState::Active;
            }
        }
    }

    fn next_pending_offset(&self) -> Option<i64> {
        self.subs
            .iter()
            .filter(|s| s.state == SubState::Pending)
            .map(|s| s.offset_frames)
            .min()
    }

    /// Read `frames` from one sub-sound into `scratch`, looping over short reads
    fn fill_from(
        reader: &mut dyn SoundReader,
        scratch: &mut [f32],
        frames: usize,
        channels: usize,
    ) -> (usize, bool) {
        let mut got = 0;
        while got < frames {
            match reader.read(&mut scratch[got * channels..], frames - got) {
                Ok(0) | Err(ReadError::WouldBlock) => break,
                Ok(n) => got += n,
                Err(ReadError::EndOfFile) => return (got, true),
                Err(ReadError::Error) => {
                    warn!(
                        "Chain sub-sound failed: {}",
                        reader.error().unwrap_or_else(|| "unknown error".to_string())
                    );
                    return (got, true);
                }
            }
        }
        (got, false)
    }
}

/// Copy `template` and adapt it to the chain's rate and channel layout
fn prepare_reader(
    template: &dyn SoundReader,
    sample_rate: u32,
    stereo: bool,
    pan: f32,
) -> Option<Box<dyn SoundReader>> {
    let mut reader = template.try_clone()?;

    if reader.sample_rate() != sample_rate {
        reader = match ResampleReader::new(reader, sample_rate) {
            Ok(r) => Box::new(r),
            Err(e) => {
                warn!("Cannot resample chain sound: {}", e);
                return None;
            }
        };
    }

    if stereo && (reader.num_channels() == 1 || pan != 0.0) {
        let mut panned = PanReader::new(reader).ok()?;
        panned.set_pan(pan);
        reader = Box::new(panned);
    }

    Some(reader)
}

impl SoundReader for SoundChain {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> std::result::Result<usize, ReadError> {
        self.finish();
        let ch = self.channels;

        loop {
            self.activate_reached();

            let mut want = frames.min(buf.len() / ch);
            let pending = self.next_pending_offset();
            if let Some(next) = pending {
                want = want.min((next - self.position) as usize);
            }
            if want == 0 {
                return Ok(0);
            }

            let active: Vec<usize> = self
                .subs
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state == SubState::Active)
                .map(|(i, _)| i)
                .collect();

            if active.is_empty() {
                if pending.is_none() {
                    return Err(ReadError::EndOfFile);
                }
                buf[..want * ch].fill(0.0);
                self.position += want as i64;
                return Ok(want);
            }

            if let [only] = active.as_slice() {
                let sub = &mut self.subs[*only];
                let Some(reader) = sub.reader.as_mut() else {
                    sub.state = SubState::Finished;
                    continue;
                };
                match reader.read(buf, want) {
                    Ok(n) => {
                        self.position += n as i64;
                        return Ok(n);
                    }
                    Err(ReadError::EndOfFile) => {
                        sub.state = SubState::Finished;
                        continue;
                    }
                    Err(ReadError::Error) => {
                        warn!(
                            "Chain sub-sound failed: {}",
                            reader.error().unwrap_or_else(|| "unknown error".to_string())
                        );
                        sub.state = SubState::Finished;
                        continue;
                    }
                    Err(ReadError::WouldBlock) => return Err(ReadError::WouldBlock),
                }
            }

            if self.scratch.len() < want * ch {
                self.scratch.resize(want * ch, 0.0);
            }

            let mut longest = 0;
            let mut stalled = Vec::new();
            for &i in &active {
                let sub = &mut self.subs[i];
                let Some(reader) = sub.reader.as_mut() else {
                    sub.state = SubState::Finished;
                    continue;
                };
                let (got, ended) = Self::fill_from(&mut **reader, &mut self.scratch, want, ch);
                if ended {
                    sub.state = SubState::Finished;
                } else if got < want {
                    stalled.push(i);
                }
                if got > 0 {
                    self.mix.set_write_offset(0);
                    self.mix.write(&self.scratch[..got * ch], 1, 1);
                    longest = longest.max(got);
                }
            }

            if longest == 0 {
                if self.subs.iter().any(|s| s.state == SubState::Active) {
                    self.mix.clear();
                    return Err(ReadError::WouldBlock);
                }
                continue;
            }

            // Sub-sounds still playing keep the full request; gaps are silence
            let out = if self.subs.iter().any(|s| s.state == SubState::Active) {
                want
            } else {
                longest
            };
            self.mix.extend(out * ch);
            self.mix.read_f32(&mut buf[..out * ch]);
            self.position += out as i64;

            // A stalled sub-sound heard silence; move it to where the chain is
            for i in stalled {
                let sub = &mut self.subs[i];
                let Some(reader) = sub.reader.as_mut() else {
                    continue;
                };
                let local = self.position - sub.offset_frames;
                debug!("Chain sub-sound {} stalled, skipping to frame {}", sub.index, local);
                if reader.set_position(local) != SeekResult::Ok {
                    sub.state = SubState::Finished;
                }
            }
            return Ok(out);
        }
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        self.finish();
        let frame = frame.max(0);
        self.position = frame;

        for sub in &mut self.subs {
            let Some(reader) = sub.reader.as_mut() else {
                sub.state = SubState::Finished;
                continue;
            };

            if sub.offset_frames > frame {
                sub.state = SubState::Pending;
                let _ = reader.set_position(0);
                continue;
            }

            let local = frame - sub.offset_frames;
            if reader.length_frames().is_some_and(|len| local >= len) {
                sub.state = SubState::Finished;
                continue;
            }

            sub.state = match reader.set_position(local) {
                SeekResult::Ok => SubState::Active,
                SeekResult::PastEnd => SubState::Finished,
                SeekResult::Error => {
                    warn!("Chain sub-sound {} failed to seek", sub.index);
                    SubState::Finished
                }
            };
        }

        match self.length_frames() {
            Some(len) if frame > len => SeekResult::PastEnd,
            _ => SeekResult::Ok,
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn num_channels(&self) -> usize {
        if self.finished {
            return self.channels;
        }
        // Same rule finish() applies, without committing to it yet
        let stereo = self.subs.iter().any(|sub| {
            sub.pan != 0.0 || self.templates.get(sub.index).is_some_and(|t| t.num_channels() == 2)
        });
        if stereo {
            2
        } else {
            1
        }
    }

    fn next_source_frame(&self) -> i64 {
        self.position
    }

    fn length_frames(&self) -> Option<i64> {
        let mut end = 0;
        for sub in &self.subs {
            let len = match &sub.reader {
                Some(reader) => reader.length_frames()?,
                None => {
                    let template = self.templates.get(sub.index)?;
                    let len = template.length_frames()?;
                    (len as f64 * self.sample_rate as f64 / template.sample_rate().max(1) as f64)
                        .round() as i64
                }
            };
            let offset = millis_to_frames(sub.offset_ms, self.sample_rate);
            end = end.max(offset + len);
        }
        Some(end)
    }

    fn set_property(&mut self, property: &Property) -> bool {
        self.finish();
        let mut handled = false;
        for reader in self.subs.iter_mut().filter_map(|s| s.reader.as_mut()) {
            handled |= reader.set_property(property);
        }
        handled
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        let mut copy = SoundChain::new(self.sample_rate);
        for template in &self.templates {
            copy.add_reader(template.try_clone()?);
        }
        for sub in &self.subs {
            copy.add_sub_sound(sub.index, sub.offset_ms, sub.pan).ok()?;
        }
        if self.finished {
            copy.finish();
        }
        Some(Box::new(copy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryReader;

    fn constant(value: f32, frames: usize, channels: usize) -> Box<dyn SoundReader> {
        Box::new(MemoryReader::new(vec![value; frames * channels], 1000, channels))
    }

    #[test]
    fn test_single_sub_sound_fast_path() {
        let mut chain = SoundChain::new(1000);
        let idx = chain.add_reader(constant(0.5, 20, 1));
        chain.add_sub_sound(idx, 0, 0.0).unwrap();

        let mut buf = [0.0f32; 32];
        assert_eq!(chain.read(&mut buf, 32), Ok(20));
        assert!(buf[..20].iter().all(|&s| s == 0.5));
        assert_eq!(chain.read(&mut buf, 32), Err(ReadError::EndOfFile));
    }

    #[test]
    fn test_offsets_are_sorted_and_gaps_are_silent() {
        let mut chain = SoundChain::new(1000);
        let idx = chain.add_reader(constant(0.25, 5, 1));
        chain.add_sub_sound(idx, 20, 0.0).unwrap();
        chain.add_sub_sound(idx, 0, 0.0).unwrap();

        let mut out = Vec::new();
        let mut buf = [0.0f32; 64];
        loop {
            match chain.read(&mut buf, 64) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ReadError::EndOfFile) => break,
                Err(e) => panic!("unexpected {:?}", e),
            }
        }

        assert_eq!(out.len(), 25);
        assert!(out[..5].iter().all(|&s| s == 0.25));
        assert!(out[5..20].iter().all(|&s| s == 0.0));
        assert!(out[20..].iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_overlapping_sub_sounds_are_summed() {
        let mut chain = SoundChain::new(1000);
        let a = chain.add_reader(constant(0.25, 10, 1));
        let b = chain.add_reader(constant(0.5, 4, 1));
        chain.add_sub_sound(a, 0, 0.0).unwrap();
        chain.add_sub_sound(b, 0, 0.0).unwrap();

        let mut buf = [0.0f32; 10];
        assert_eq!(chain.read(&mut buf, 10), Ok(10));
        assert!(buf[..4].iter().all(|&s| s == 0.75));
        assert!(buf[4..].iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_stereo_chain_upmixes_mono() {
        let mut chain = SoundChain::new(1000);
        let mono = chain.add_reader(constant(0.5, 4, 1));
        let stereo = chain.add_reader(constant(0.1, 4, 2));
        chain.add_sub_sound(mono, 0, 0.0).unwrap();
        chain.add_sub_sound(stereo, 100, 0.0).unwrap();

        assert_eq!(chain.num_channels(), 2);
        let mut buf = [0.0f32; 8];
        assert_eq!(chain.read(&mut buf, 4), Ok(4));
        assert_eq!(buf, [0.5; 8]);
    }

    #[test]
    fn test_multichannel_sources_are_dropped() {
        let mut chain = SoundChain::new(1000);
        let surround = chain.add_reader(constant(0.5, 4, 6));
        chain.add_sub_sound(surround, 0, 0.0).unwrap();
        chain.finish();
        assert_eq!(chain.sub_sound_count(), 0);
    }

    #[test]
    fn test_seek_activates_and_skips() {
        let mut chain = SoundChain::new(1000);
        let short = chain.add_reader(constant(0.25, 5, 1));
        let long: Vec<f32> = (0..50).map(|i| i as f32).collect();
        let long = chain.add_reader(Box::new(MemoryReader::new(long, 1000, 1)));
        chain.add_sub_sound(short, 0, 0.0).unwrap();
        chain.add_sub_sound(long, 10, 0.0).unwrap();

        assert_eq!(chain.set_position(30), SeekResult::Ok);
        let mut buf = [0.0f32; 4];
        assert_eq!(chain.read(&mut buf, 4), Ok(4));
        // Only the long sound is active, 20 frames in
        assert_eq!(buf, [20.0, 21.0, 22.0, 23.0]);
        assert_eq!(chain.length_frames(), Some(60));
        assert_eq!(chain.set_position(500), SeekResult::PastEnd);
    }

    /// Stalls on every other read
    struct Stuttering {
        inner: MemoryReader,
        stall_next: bool,
    }

    impl SoundReader for Stuttering {
        fn read(&mut self, buf: &mut [f32], frames: usize) -> std::result::Result<usize, ReadError> {
            let stall = self.stall_next;
            self.stall_next = !stall;
            if stall {
                return Err(ReadError::WouldBlock);
            }
            self.inner.read(buf, frames)
        }
        fn set_position(&mut self, frame: i64) -> SeekResult {
            self.inner.set_position(frame)
        }
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }
        fn num_channels(&self) -> usize {
            self.inner.num_channels()
        }
        fn next_source_frame(&self) -> i64 {
            self.inner.next_source_frame()
        }
        fn length_frames(&self) -> Option<i64> {
            self.inner.length_frames()
        }
        fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
            let mut inner = self.inner.clone();
            let _ = inner.set_position(0);
            Some(Box::new(Stuttering {
                inner,
                stall_next: true,
            }))
        }
    }

    #[test]
    fn test_stalled_sub_sound_keeps_its_place() {
        let mut chain = SoundChain::new(1000);
        let ramp: Vec<f32> = (0..40).map(|i| i as f32).collect();
        let stutter = chain.add_reader(Box::new(Stuttering {
            inner: MemoryReader::new(ramp, 1000, 1),
            stall_next: true,
        }));
        let bed = chain.add_reader(constant(0.0, 40, 1));
        chain.add_sub_sound(stutter, 0, 0.0).unwrap();
        chain.add_sub_sound(bed, 0, 0.0).unwrap();

        let mut buf = [1.0f32; 10];
        assert_eq!(chain.read(&mut buf, 10), Ok(10));
        assert_eq!(buf, [0.0; 10]);

        assert_eq!(chain.read(&mut buf, 10), Ok(10));
        let expected: Vec<f32> = (10..20).map(|i| i as f32).collect();
        assert_eq!(buf.to_vec(), expected);
        assert_eq!(chain.next_source_frame(), 20);
    }

    #[test]
    fn test_unknown_index_rejected() {
        let mut chain = SoundChain::new(1000);
        assert!(chain.add_sub_sound(3, 0, 0.0).is_err());
    }
}
