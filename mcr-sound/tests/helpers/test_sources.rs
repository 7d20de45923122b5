//! Scripted voice sources and manually driven engines

use mcr_sound::audio::TimerDriver;
use mcr_sound::playback::{BlockRead, EngineConfig, FinishInfo, MixSource, MixingEngine};
use mcr_sound::reader::ReadError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a [`TestSource`] behaves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceMode {
    /// Constant samples for `frames` frames, then EOF
    Data { value: f32, frames: usize },
    /// Never has data ready
    WouldBlock,
    /// Fails on the first read after `frames` frames
    FailAfter { value: f32, frames: usize },
}

/// Voice source that counts every call the engine makes
pub struct TestSource {
    mode: SourceMode,
    position: Mutex<usize>,
    reads: AtomicUsize,
    finished: Mutex<Vec<FinishInfo>>,
}

impl TestSource {
    pub fn new(mode: SourceMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            position: Mutex::new(0),
            reads: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
        })
    }

    pub fn constant(value: f32, frames: usize) -> Arc<Self> {
        Self::new(SourceMode::Data { value, frames })
    }

    /// Calls to `read_block` so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every `finished` notification received
    pub fn finished(&self) -> Vec<FinishInfo> {
        self.finished.lock().unwrap().clone()
    }

    fn fill(&self, buf: &mut [f32], frames: usize, value: f32, total: usize) -> Option<usize> {
        let mut position = self.position.lock().unwrap();
        let n = frames.min(total - *position);
        if n == 0 {
            return None;
        }
        buf[..n * 2].fill(value);
        *position += n;
        Some(n)
    }
}

impl MixSource for TestSource {
    fn read_block(&self, buf: &mut [f32], frames: usize) -> Result<BlockRead, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let source_frame = *self.position.lock().unwrap() as i64;
        let frames = match self.mode {
            SourceMode::WouldBlock => return Err(ReadError::WouldBlock),
            SourceMode::Data { value, frames: total } => {
                self.fill(buf, frames, value, total).ok_or(ReadError::EndOfFile)?
            }
            SourceMode::FailAfter { value, frames: total } => {
                self.fill(buf, frames, value, total).ok_or(ReadError::Error)?
            }
        };
        Ok(BlockRead {
            frames,
            source_frame,
            ratio: 1.0,
        })
    }

    fn error(&self) -> Option<String> {
        match self.mode {
            SourceMode::FailAfter { .. } => Some("simulated read failure".to_string()),
            _ => None,
        }
    }

    fn finished(&self, info: FinishInfo) {
        self.finished.lock().unwrap().push(info);
    }
}

/// Engine on a manual timer driver with default settings
pub fn manual_engine() -> (TimerDriver, Arc<MixingEngine>) {
    manual_engine_with(EngineConfig::default())
}

pub fn manual_engine_with(config: EngineConfig) -> (TimerDriver, Arc<MixingEngine>) {
    let driver = TimerDriver::manual(super::TEST_SAMPLE_RATE);
    let engine = MixingEngine::new(driver.clock(), &config).expect("engine starts");
    (driver, Arc::new(engine))
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
