//! Mixing engine
//!
//! Owns the voice pool, the decode thread and the mix accumulator. The audio
//! driver calls one of the `mix_*` methods from its callback; application
//! threads start and stop voices through [`VoiceHandle`]s.
//!
//! **Locking:** a slot's source lock may be held while taking the data lock,
//! never the other way round. The mix callback takes only the data lock and
//! holds it for one pass over the voices.

use super::decoder_worker;
use super::position_map::DEFAULT_MAP_CAPACITY;
use super::ring_buffer::{block_ring, blocks_for_frames, CHANNELS};
use super::underrun::UnderrunMonitor;
use super::voice::{
    AttachedSource, MixSource, Slot, StartOptions, VoiceData, VoiceHandle, VoiceState,
};
use crate::audio::accumulator::MixAccumulator;
use crate::audio::driver::AudioDriver;
use crate::error::{Error, Result};
use crate::reader::ChainOptions;
use mcr_common::SoundConfig;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Engine tuning derived from [`SoundConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of voice slots
    pub max_voices: usize,

    /// Frames buffered ahead of the mixer per voice
    pub decode_buffer_frames: usize,

    /// Decode thread wake-up period
    pub decode_period: Duration,

    /// Minimum interval between underrun reports
    pub underrun_log_interval: Duration,

    /// Drop plays flagged as actions
    pub mute_actions: bool,

    /// Segments kept per position map
    pub map_capacity: usize,

    /// Reader chain construction for sounds loaded through this engine
    pub chain: mcr_common::config::ChainConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_sound_config(&SoundConfig::default())
    }
}

impl EngineConfig {
    pub fn from_sound_config(config: &SoundConfig) -> Self {
        Self {
            max_voices: config.max_voices.max(1),
            decode_buffer_frames: config.decode_buffer_frames,
            decode_period: Duration::from_millis(config.decode_period_ms.max(1)),
            underrun_log_interval: Duration::from_millis(config.underrun_log_interval_ms),
            mute_actions: config.mute_actions,
            map_capacity: DEFAULT_MAP_CAPACITY,
            chain: config.chain.clone(),
        }
    }
}

/// Receives load failures so they can be shown to the user
pub trait LoadErrorReporter: Send + Sync {
    fn report(&self, name: &str, message: &str);
}

/// State guarded by the data lock
pub(crate) struct EngineData {
    pub voices: Vec<VoiceData>,
    pub mix: MixAccumulator,

    /// Hardware frame following the last mixed buffer
    pub next_mix_frame: i64,
}

/// State shared with the decode thread
pub(crate) struct EngineShared {
    pub driver: Arc<dyn AudioDriver>,
    pub slots: Vec<Slot>,
    pub data: Mutex<EngineData>,

    /// Serializes slot assignment
    slot_list: Mutex<()>,

    /// Set when the decode thread has work; paired with `wake_signal`
    pub wake: Mutex<bool>,
    pub wake_signal: Condvar,
    pub stop_flag: AtomicBool,

    pub underruns: UnderrunMonitor,
    pub decode_period: Duration,

    /// Highest hardware frame reported so far
    last_hw: AtomicI64,

    /// f32 bits
    attract_volume: AtomicU32,
}

impl EngineShared {
    pub fn lock_data(&self) -> MutexGuard<'_, EngineData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the decode thread early
    pub fn notify(&self) {
        let mut woken = self.wake.lock().unwrap_or_else(PoisonError::into_inner);
        *woken = true;
        self.wake_signal.notify_one();
    }

    /// Hardware position, clamped so it never moves backwards
    pub fn hardware_frame(&self) -> i64 {
        let reported = self.driver.hardware_position();
        let previous = self.last_hw.fetch_max(reported, Ordering::AcqRel);
        previous.max(reported)
    }

    /// Take a slot's source if it still belongs to `generation`
    pub fn detach_source(&self, index: usize, generation: u64) -> Option<Arc<dyn MixSource>> {
        let taken = {
            let mut source = self.slots[index]
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if source.as_ref().is_some_and(|s| s.generation == generation) {
                source.take().map(|s| s.source)
            } else {
                None
            }
        };

        let mut data = self.lock_data();
        let voice = &mut data.voices[index];
        if voice.generation == generation {
            voice.source_attached = false;
        }
        taken
    }
}

/// Real-time voice mixer
pub struct MixingEngine {
    shared: Arc<EngineShared>,
    config: EngineConfig,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
    load_error_reporter: Mutex<Option<Box<dyn LoadErrorReporter>>>,
}

impl MixingEngine {
    /// Create the voice pool and start the decode thread
    pub fn new(driver: Arc<dyn AudioDriver>, config: &EngineConfig) -> Result<Self> {
        let capacity = blocks_for_frames(config.decode_buffer_frames);
        let mut slots = Vec::with_capacity(config.max_voices);
        let mut voices = Vec::with_capacity(config.max_voices);
        for _ in 0..config.max_voices {
            let (producer, consumer) = block_ring(capacity);
            slots.push(Slot {
                source: Mutex::new(None),
                producer: Mutex::new(producer),
            });
            voices.push(VoiceData::new(consumer, config.map_capacity));
        }

        let shared = Arc::new(EngineShared {
            driver,
            slots,
            data: Mutex::new(EngineData {
                voices,
                mix: MixAccumulator::with_capacity(4_096 * CHANNELS),
                next_mix_frame: i64::MIN,
            }),
            slot_list: Mutex::new(()),
            wake: Mutex::new(false),
            wake_signal: Condvar::new(),
            stop_flag: AtomicBool::new(false),
            underruns: UnderrunMonitor::new(config.underrun_log_interval),
            decode_period: config.decode_period,
            last_hw: AtomicI64::new(0),
            attract_volume: AtomicU32::new(1.0f32.to_bits()),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("mcr-decode".to_string())
            .spawn(move || decoder_worker::run(worker_shared))
            .map_err(|e| Error::Playback(format!("Failed to start decode thread: {}", e)))?;

        info!(
            "Mixing engine started: {} voices, {} blocks per voice, {}Hz",
            config.max_voices,
            capacity,
            shared.driver.sample_rate()
        );

        Ok(Self {
            shared,
            config: config.clone(),
            decode_thread: Mutex::new(Some(handle)),
            load_error_reporter: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Chain options for sounds played through this engine
    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions::from_config(&self.config.chain, self.sample_rate())
    }

    /// Assign a voice to `source`, prebuffer it and start it
    ///
    /// Prebuffering runs on the calling thread. Fails with
    /// [`Error::SlotExhausted`] when every slot is in use.
    pub fn start_mixing(
        &self,
        source: Arc<dyn MixSource>,
        options: StartOptions,
    ) -> Result<VoiceHandle> {
        let handle = {
            let _assigning = self
                .shared
                .slot_list
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut data = self.shared.lock_data();
            let Some(index) = data
                .voices
                .iter()
                .position(|v| v.state == VoiceState::Available)
            else {
                warn!("No free voice slot ({} in use)", data.voices.len());
                return Err(Error::SlotExhausted(data.voices.len()));
            };
            let generation = data.voices[index].assign(options.start_frame);
            VoiceHandle { index, generation }
        };

        *self.shared.slots[handle.index]
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(AttachedSource {
            generation: handle.generation,
            source,
        });

        decoder_worker::fill_voice(&self.shared, handle);

        {
            let mut data = self.shared.lock_data();
            let voice = &mut data.voices[handle.index];
            if voice.generation == handle.generation && voice.state == VoiceState::Buffering {
                voice.state = VoiceState::Playing;
            }
        }
        self.shared.notify();

        debug!(
            "Voice {} started (generation {})",
            handle.index, handle.generation
        );
        Ok(handle)
    }

    /// Stop a voice and release its source
    ///
    /// Waits for an in-flight read on the voice to finish. Once this returns
    /// the source is never called again. Returns false for stale handles.
    pub fn stop_mixing(&self, handle: VoiceHandle) -> bool {
        {
            let mut data = self.shared.lock_data();
            let Some(voice) = data.voices.get_mut(handle.index) else {
                return false;
            };
            if voice.generation != handle.generation || !voice.state.is_active() {
                return false;
            }
            voice.state = VoiceState::Halting;
        }

        let released = self.shared.detach_source(handle.index, handle.generation);
        drop(released);
        self.shared.notify();

        debug!("Voice {} stopped", handle.index);
        true
    }

    /// Pause or resume a voice; returns false for stale handles
    pub fn pause_mixing(&self, handle: VoiceHandle, paused: bool) -> bool {
        let mut data = self.shared.lock_data();
        match data.voices.get_mut(handle.index) {
            Some(voice) if voice.generation == handle.generation && voice.state.is_active() => {
                voice.paused = paused;
                true
            }
            _ => false,
        }
    }

    /// True while the voice is buffering, playing or draining
    pub fn is_active(&self, handle: VoiceHandle) -> bool {
        let data = self.shared.lock_data();
        data.voices
            .get(handle.index)
            .is_some_and(|v| v.generation == handle.generation && v.state.is_active())
    }

    /// Current state of a voice, or an error for a stale handle
    pub fn voice_state(&self, handle: VoiceHandle) -> Result<VoiceState> {
        let data = self.shared.lock_data();
        match data.voices.get(handle.index) {
            Some(voice) if voice.matches(handle) => Ok(voice.state),
            _ => Err(Error::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            }),
        }
    }

    /// Source frame audible right now
    ///
    /// Maps the hardware position through the voice's hardware-to-stream and
    /// stream-to-source maps. None for stale handles or before the voice has
    /// been mixed for the first time.
    pub fn source_position(&self, handle: VoiceHandle) -> Option<i64> {
        let hw = self.shared.hardware_frame();
        let data = self.shared.lock_data();
        let voice = data.voices.get(handle.index)?;
        if !voice.matches(handle) || voice.hw_to_stream.is_empty() {
            return None;
        }
        if voice.stream_to_source.is_empty() {
            return None;
        }
        let stream = voice.hw_to_stream.search(hw);
        Some(voice.stream_to_source.search(stream))
    }

    /// Hardware frame currently being heard, never decreasing
    pub fn hardware_frame(&self) -> i64 {
        self.shared.hardware_frame()
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.driver.sample_rate()
    }

    /// Output latency in seconds
    pub fn play_latency(&self) -> f64 {
        self.shared.driver.play_latency()
    }

    /// Total voice underruns since startup
    pub fn underrun_count(&self) -> u64 {
        self.shared.underruns.count()
    }

    /// Voices not in the Available state
    pub fn active_voices(&self) -> usize {
        let data = self.shared.lock_data();
        data.voices
            .iter()
            .filter(|v| v.state != VoiceState::Available)
            .count()
    }

    /// Global volume applied when a sound starts playing
    pub fn set_attract_volume(&self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.shared
            .attract_volume
            .store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn attract_volume(&self) -> f32 {
        f32::from_bits(self.shared.attract_volume.load(Ordering::Relaxed))
    }

    pub fn mute_actions(&self) -> bool {
        self.config.mute_actions
    }

    pub fn set_load_error_reporter(&self, reporter: Box<dyn LoadErrorReporter>) {
        *self
            .load_error_reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reporter);
    }

    /// Pass a load failure to the reporter, or log it if none is installed
    pub fn report_load_error(&self, name: &str, message: &str) {
        let reporter = self
            .load_error_reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match reporter.as_ref() {
            Some(reporter) => reporter.report(name, message),
            None => error!("Failed to load {}: {}", name, message),
        }
    }

    /// Mix `frames` frames into an interleaved stereo i16 buffer
    ///
    /// `first_frame` is the hardware frame of the buffer's first frame and
    /// `current_frame` the frame the device is playing now.
    ///
    /// **REAL-TIME SAFE**: no allocation after warm-up, no logging, and no
    /// lock other than the data lock.
    pub fn mix_i16(&self, out: &mut [i16], frames: usize, first_frame: i64, current_frame: i64) {
        let frames = frames.min(out.len() / CHANNELS);
        let mut data = self.shared.lock_data();
        self.mix_voices(&mut data, frames, first_frame, current_frame);
        data.mix.read_i16(&mut out[..frames * CHANNELS]);
    }

    /// Mix into an interleaved stereo f32 buffer
    pub fn mix_f32(&self, out: &mut [f32], frames: usize, first_frame: i64, current_frame: i64) {
        let frames = frames.min(out.len() / CHANNELS);
        let mut data = self.shared.lock_data();
        self.mix_voices(&mut data, frames, first_frame, current_frame);
        data.mix.read_f32(&mut out[..frames * CHANNELS]);
    }

    /// Mix into one f32 slice per channel (left, right)
    ///
    /// Further slices get silence; a single slice gets a mono fold.
    pub fn mix_planar(
        &self,
        out: &mut [&mut [f32]],
        frames: usize,
        first_frame: i64,
        current_frame: i64,
    ) {
        let frames = out
            .iter()
            .map(|ch| ch.len())
            .min()
            .map_or(0, |len| frames.min(len));
        let mut data = self.shared.lock_data();
        self.mix_voices(&mut data, frames, first_frame, current_frame);
        data.mix.read_planar(out, CHANNELS);
    }

    /// One pass over the voices, leaving `frames` stereo frames in the accumulator
    fn mix_voices(&self, data: &mut EngineData, frames: usize, first_frame: i64, current_frame: i64) {
        self.shared.last_hw.fetch_max(current_frame, Ordering::AcqRel);
        let visible = self.shared.hardware_frame();

        // A driver that restarts its frame count must not rewind the maps
        let first_frame = first_frame.max(data.next_mix_frame);
        data.next_mix_frame = first_frame + frames as i64;

        let EngineData { voices, mix, .. } = data;
        mix.clear();
        mix.extend(frames * CHANNELS);

        for voice in voices.iter_mut() {
            match voice.state {
                VoiceState::Available | VoiceState::Buffering => continue,
                VoiceState::Halting => {
                    if !voice.source_attached {
                        voice.release();
                    }
                    continue;
                }
                VoiceState::Playing | VoiceState::Stopping => {}
            }

            let mut cursor = 0usize;
            if let Some(start) = voice.start_frame {
                if start > first_frame {
                    cursor = ((start - first_frame) as usize).min(frames);
                    voice.hw_to_stream.insert(
                        first_frame,
                        cursor as i64,
                        voice.play_stream_frame,
                        0.0,
                    );
                }
            }

            if voice.paused {
                voice.hw_to_stream.insert(
                    first_frame + cursor as i64,
                    (frames - cursor) as i64,
                    voice.play_stream_frame,
                    0.0,
                );
                continue;
            }

            let mut hw = first_frame + cursor as i64;
            let mut out_of_order = false;
            let got = {
                let VoiceData {
                    consumer,
                    hw_to_stream,
                    play_stream_frame,
                    ..
                } = voice;
                consumer.read_into(frames - cursor, |samples, stream_pos| {
                    let n = samples.len() / CHANNELS;
                    debug_assert!(stream_pos >= *play_stream_frame, "block out of order");
                    if stream_pos < *play_stream_frame {
                        out_of_order = true;
                        return;
                    }
                    mix.set_write_offset((hw - first_frame) as usize * CHANNELS);
                    mix.write(samples, 1, 1);
                    hw_to_stream.insert(hw, n as i64, stream_pos, 1.0);
                    hw += n as i64;
                    *play_stream_frame = stream_pos + n as i64;
                })
            };

            if out_of_order {
                // Corrupt stream: drop the voice through the normal finish path
                voice.error = Some("audio blocks out of order".to_string());
                voice.consumer.clear();
                voice.state = VoiceState::Stopping;
                voice.drained = true;
                continue;
            }

            cursor += got;
            if cursor < frames {
                let remaining = (frames - cursor) as i64;
                voice
                    .hw_to_stream
                    .insert(hw, remaining, voice.play_stream_frame, 0.0);
                match voice.state {
                    VoiceState::Playing => self.shared.underruns.record(),
                    VoiceState::Stopping if voice.consumer.is_empty() => voice.drained = true,
                    _ => {}
                }
            }

            voice.hw_to_stream.discard_before(visible);
            let stream = voice.hw_to_stream.search(visible);
            voice.stream_to_source.discard_before(stream);
        }
    }

    /// Stop the decode thread and release every source
    ///
    /// Safe to call more than once. Mix calls after shutdown produce silence
    /// for voices that were playing.
    pub fn shutdown(&self) {
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        self.shared.notify();

        let handle = self
            .decode_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        debug!("Waiting for decode thread to exit");
        if let Err(e) = handle.join() {
            error!("Decode thread panicked: {:?}", e);
        }

        let active: Vec<VoiceHandle> = {
            let data = self.shared.lock_data();
            data.voices
                .iter()
                .enumerate()
                .filter(|(_, v)| v.state.is_active())
                .map(|(index, v)| VoiceHandle {
                    index,
                    generation: v.generation,
                })
                .collect()
        };
        for handle in active {
            self.stop_mixing(handle);
        }
        info!("Mixing engine stopped");
    }
}

impl Drop for MixingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MixingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixingEngine")
            .field("config", &self.config)
            .field("sample_rate", &self.sample_rate())
            .finish()
    }
}
