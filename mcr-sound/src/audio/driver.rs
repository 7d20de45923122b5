//! Audio driver contract
//!
//! A driver owns the output device (or stands in for one) and calls the
//! engine's `mix_*` methods from its callback. The engine in turn asks the
//! driver where playback currently is through [`AudioDriver`].
//!
//! Drivers keep their position in a shared [`DriverClock`]; the engine holds
//! the clock, the driver's callback holds the engine.

use crate::playback::engine::MixingEngine;
use crate::playback::ring_buffer::CHANNELS;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// What the engine needs to know about the output
pub trait AudioDriver: Send + Sync {
    /// Hardware frame being heard right now
    fn hardware_position(&self) -> i64;

    /// Seconds between mixing a frame and hearing it
    fn play_latency(&self) -> f64;

    fn sample_rate(&self) -> u32;
}

/// Position and timing shared between a driver and the engine
#[derive(Debug)]
pub struct DriverClock {
    position: AtomicI64,
    sample_rate: u32,
    /// f64 bits
    latency: AtomicU64,
}

impl DriverClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            position: AtomicI64::new(0),
            sample_rate,
            latency: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set_position(&self, frame: i64) {
        self.position.store(frame, Ordering::Release);
    }

    pub fn set_latency(&self, seconds: f64) {
        self.latency.store(seconds.max(0.0).to_bits(), Ordering::Relaxed);
    }
}

impl AudioDriver for DriverClock {
    fn hardware_position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    fn play_latency(&self) -> f64 {
        f64::from_bits(self.latency.load(Ordering::Relaxed))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Driver without an output device
///
/// In timed mode a background thread mixes one period at a time at wall-clock
/// pace and discards the result; the hardware position trails the mixed
/// position by one period. In manual mode nothing runs on its own: callers
/// set the position and pull mixed audio with [`TimerDriver::pump`].
pub struct TimerDriver {
    clock: Arc<DriverClock>,
    period_frames: usize,
    /// Next hardware frame to mix in manual mode
    write_frame: AtomicI64,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TimerDriver {
    /// Manual driver for tests and offline rendering
    pub fn manual(sample_rate: u32) -> Self {
        Self {
            clock: Arc::new(DriverClock::new(sample_rate)),
            period_frames: 0,
            write_frame: AtomicI64::new(0),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Wall-clock driver mixing `period` worth of frames per tick
    pub fn timed(sample_rate: u32, period: Duration) -> Self {
        let period_frames =
            mcr_common::time::duration_to_frames(period, sample_rate).max(1) as usize;
        let clock = Arc::new(DriverClock::new(sample_rate));
        clock.set_latency(period_frames as f64 / sample_rate as f64);
        Self {
            clock,
            period_frames,
            write_frame: AtomicI64::new(0),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Clock to hand to [`MixingEngine::new`]
    pub fn clock(&self) -> Arc<DriverClock> {
        Arc::clone(&self.clock)
    }

    /// Start the mixing thread (timed mode only)
    ///
    /// The thread holds only a weak reference, so dropping the engine ends it.
    pub fn start(&mut self, engine: &Arc<MixingEngine>) -> crate::Result<()> {
        if self.period_frames == 0 || self.thread.is_some() {
            return Ok(());
        }

        let engine: Weak<MixingEngine> = Arc::downgrade(engine);
        let clock = Arc::clone(&self.clock);
        let stop_flag = Arc::clone(&self.stop_flag);
        let frames = self.period_frames;
        let period = Duration::from_secs_f64(frames as f64 / clock.sample_rate as f64);

        let handle = std::thread::Builder::new()
            .name("mcr-timer-driver".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; frames * CHANNELS];
                let mut mixed: i64 = 0;
                let started = Instant::now();
                let mut ticks: u32 = 0;

                while !stop_flag.load(Ordering::Relaxed) {
                    let Some(engine) = engine.upgrade() else {
                        break;
                    };
                    let heard = (mixed - frames as i64).max(0);
                    clock.set_position(heard);
                    engine.mix_f32(&mut buffer, frames, mixed, heard);
                    drop(engine);
                    mixed += frames as i64;

                    ticks = ticks.saturating_add(1);
                    let due = started + period * ticks;
                    if let Some(wait) = due.checked_duration_since(Instant::now()) {
                        std::thread::sleep(wait);
                    }
                }
                debug!("Timer driver thread exited");
            })
            .map_err(|e| crate::Error::AudioOutput(format!("Failed to start timer driver: {}", e)))?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Set the hardware position (manual mode)
    pub fn set_position(&self, frame: i64) {
        self.clock.set_position(frame);
    }

    /// Mix the next `frames` frames into `out` and advance the hardware
    /// position to the first frame of this buffer (manual mode)
    pub fn pump(&self, engine: &MixingEngine, out: &mut [f32], frames: usize) {
        let first = self.write_frame.fetch_add(frames as i64, Ordering::AcqRel);
        self.clock.set_position(first);
        engine.mix_f32(out, frames, first, first);
    }

    /// Stop the mixing thread
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if let Err(e) = handle.join() {
                error!("Timer driver thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_reports_what_was_set() {
        let clock = DriverClock::new(48_000);
        clock.set_position(1_234);
        clock.set_latency(0.02);
        assert_eq!(clock.hardware_position(), 1_234);
        assert_eq!(clock.sample_rate(), 48_000);
        assert!((clock.play_latency() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_timed_driver_latency_is_one_period() {
        let driver = TimerDriver::timed(44_100, Duration::from_millis(10));
        assert_eq!(driver.period_frames, 441);
        assert!((driver.clock().play_latency() - 0.01).abs() < 1e-9);
    }
}
