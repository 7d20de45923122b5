//! Playback handle tests against real WAV files

mod helpers;

use helpers::{manual_engine, manual_engine_with, wait_until, write_constant_wav, TEST_SAMPLE_RATE};
use mcr_sound::playback::{EngineConfig, LoadErrorReporter, Sound, SoundParams};
use mcr_sound::reader::{MemoryReader, ReadError, SeekResult, SoundReader, StopMode};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn constant_file(dir: &TempDir, name: &str, frames: usize, value: f32) -> PathBuf {
    let path = dir.path().join(name);
    write_constant_wav(&path, TEST_SAMPLE_RATE, 2, frames, value).unwrap();
    path
}

/// Plays `remaining` frames, then fails
struct FailingReader {
    remaining: usize,
    position: i64,
}

impl SoundReader for FailingReader {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        if self.remaining == 0 {
            return Err(ReadError::Error);
        }
        let n = frames.min(self.remaining).min(buf.len() / 2);
        buf[..n * 2].fill(0.25);
        self.remaining -= n;
        self.position += n as i64;
        Ok(n)
    }
    fn set_position(&mut self, _frame: i64) -> SeekResult {
        SeekResult::Error
    }
    fn sample_rate(&self) -> u32 {
        TEST_SAMPLE_RATE
    }
    fn num_channels(&self) -> usize {
        2
    }
    fn next_source_frame(&self) -> i64 {
        self.position
    }
    fn error(&self) -> Option<String> {
        (self.remaining == 0).then(|| "device unplugged".to_string())
    }
    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        None
    }
}

struct CountingReporter(Arc<AtomicUsize>);

impl LoadErrorReporter for CountingReporter {
    fn report(&self, _name: &str, _message: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_play_reports_advancing_position() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "tone.wav", 44_100, 0.5);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, false).unwrap();
    assert_eq!(sound.path(), Some(path.as_path()));
    assert!((sound.length_seconds().unwrap() - 1.0).abs() < 1e-3);

    assert!(sound.play(false, None));
    assert!(sound.is_playing());

    let mut buf = vec![0.0f32; 512 * 2];
    let mut last = -1.0;
    for _ in 0..10 {
        driver.pump(&engine, &mut buf, 512);
        let position = sound.position();
        assert!(!position.approximate);
        assert!(position.seconds >= last);
        last = position.seconds;
    }
    assert!(buf.iter().all(|s| *s == 0.5));

    let expected = 9.0 * 512.0 / TEST_SAMPLE_RATE as f64;
    assert!(
        (last - expected).abs() < 1e-3,
        "expected {:.4}s, got {:.4}s",
        expected,
        last
    );
}

#[test]
fn test_stop_remembers_position() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "tone.wav", 44_100, 0.5);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, true).unwrap();
    sound.play(false, None);

    let mut buf = vec![0.0f32; 441 * 2];
    for _ in 0..3 {
        driver.pump(&engine, &mut buf, 441);
    }
    sound.stop();
    assert!(!sound.is_playing());
    assert!((sound.position_seconds() - 0.02).abs() < 1e-3);
}

#[test]
fn test_seek_while_stopped_applies_on_play() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "tone.wav", 44_100, 0.5);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, false).unwrap();
    sound.set_position_seconds(0.5);
    assert!((sound.position_seconds() - 0.5).abs() < 1e-6);

    sound.play(false, None);
    let before_mix = sound.position();
    assert!(before_mix.approximate);
    assert!((before_mix.seconds - 0.5).abs() < 1e-3);

    let mut buf = vec![0.0f32; 512 * 2];
    driver.pump(&engine, &mut buf, 512);
    assert!((sound.position_seconds() - 0.5).abs() < 1e-3);
}

#[test]
fn test_seek_past_end_is_clamped() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "short.wav", 4_410, 0.5);
    let (_driver, engine) = manual_engine();

    let mut sound = Sound::new(engine);
    sound.load(&path, false).unwrap();
    sound.set_position_seconds(5.0);
    assert!((sound.position_seconds() - 0.1).abs() < 1e-3);
}

#[test]
fn test_seek_while_playing_restarts_voice() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "tone.wav", 44_100, 0.5);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, false).unwrap();
    sound.play(false, None);

    let mut buf = vec![0.0f32; 512 * 2];
    driver.pump(&engine, &mut buf, 512);
    sound.set_position_seconds(0.25);
    assert!(sound.is_playing());

    driver.pump(&engine, &mut buf, 512);
    assert!((sound.position_seconds() - 0.25).abs() < 1e-3);
}

#[test]
fn test_playing_twice_starts_an_independent_copy() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "click.wav", 44_100, 0.25);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, true).unwrap();
    assert!(sound.play(false, None));
    assert!(sound.play(false, None));
    assert_eq!(engine.active_voices(), 2);

    let mut buf = vec![0.0f32; 256 * 2];
    driver.pump(&engine, &mut buf, 256);
    assert!(buf.iter().all(|s| *s == 0.5));

    // Stopping the sound leaves the copy running on its own
    sound.stop();
    driver.pump(&engine, &mut buf, 256);
    assert!(buf.iter().all(|s| *s == 0.25));
    assert_eq!(engine.active_voices(), 1);
}

#[test]
fn test_copy_is_dropped_when_finished() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "blip.wav", 300, 0.25);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, true).unwrap();
    sound.play(false, None);
    sound.play(false, None);

    let mut buf = vec![0.0f32; 512 * 2];
    assert!(wait_until(Duration::from_secs(2), || {
        driver.pump(&engine, &mut buf, 512);
        engine.active_voices() == 0
    }));
    assert!(!sound.is_playing());
    assert!((sound.position_seconds() - 300.0 / TEST_SAMPLE_RATE as f64).abs() < 1e-3);
}

#[test]
fn test_load_failure_falls_back_to_silence() {
    let (driver, engine) = manual_engine();
    let reports = Arc::new(AtomicUsize::new(0));
    engine.set_load_error_reporter(Box::new(CountingReporter(Arc::clone(&reports))));

    let mut sound = Sound::new(Arc::clone(&engine));
    assert!(sound.load("/nonexistent/missing.ogg".as_ref(), false).is_err());
    assert_eq!(reports.load(Ordering::SeqCst), 1);
    assert!(sound.error().is_some());
    assert!(sound.is_loaded());

    // Playing the fallback is harmless and produces nothing
    sound.play(false, None);
    let mut buf = vec![1.0f32; 256 * 2];
    driver.pump(&engine, &mut buf, 256);
    assert!(buf.iter().all(|s| *s == 0.0));
    assert_eq!(reports.load(Ordering::SeqCst), 1);
}

#[test]
fn test_read_failure_is_reported_by_sound() {
    let (driver, engine) = manual_engine();
    let mut sound = Sound::new(Arc::clone(&engine));
    sound
        .load_reader(
            Box::new(FailingReader {
                remaining: 1000,
                position: 0,
            }),
            "flaky",
        )
        .unwrap();
    assert!(sound.error().is_none());
    assert!(sound.play(false, None));

    let mut buf = vec![0.0f32; 512 * 2];
    assert!(wait_until(Duration::from_secs(2), || {
        driver.pump(&engine, &mut buf, 512);
        sound.error().is_some()
    }));
    assert!(!sound.is_playing());

    let message = sound.error().unwrap();
    assert!(message.contains("device unplugged"), "got {:?}", message);
}

#[test]
fn test_unloaded_sound_does_nothing() {
    let (_driver, engine) = manual_engine();
    let mut sound = Sound::new(engine);
    assert!(!sound.play(false, None));
    assert!(!sound.pause(true));
    assert!(!sound.is_playing());
    assert_eq!(sound.length_seconds(), None);
    assert_eq!(sound.position_seconds(), 0.0);
}

#[test]
fn test_actions_are_muted_when_configured() {
    let config = EngineConfig {
        mute_actions: true,
        ..EngineConfig::default()
    };
    let (_driver, engine) = manual_engine_with(config);

    let mut sound = Sound::new(Arc::clone(&engine));
    sound
        .load_reader(Box::new(MemoryReader::new(vec![0.5f32; 2_000], 44_100, 2)), "beep")
        .unwrap();
    assert!(!sound.play(true, None));
    assert!(sound.play(false, None));
}

#[test]
fn test_volume_is_scaled_by_attract_volume() {
    let (driver, engine) = manual_engine();
    engine.set_attract_volume(0.5);

    let mut sound = Sound::new(Arc::clone(&engine));
    sound
        .load_reader(Box::new(MemoryReader::new(vec![0.5f32; 20_000], 44_100, 2)), "pad")
        .unwrap();
    assert!(sound.set_property("volume", "0.5"));
    sound.play(false, None);

    let mut buf = vec![0.0f32; 256 * 2];
    driver.pump(&engine, &mut buf, 256);
    assert!(buf.iter().all(|s| (*s - 0.125).abs() < 1e-6), "got {}", buf[0]);
    assert_eq!(sound.params().volume, 0.5);
}

#[test]
fn test_properties_by_name() {
    let (_driver, engine) = manual_engine();
    let mut sound = Sound::new(engine);
    sound
        .load_reader(Box::new(MemoryReader::new(vec![0.0f32; 200], 44_100, 1)), "x")
        .unwrap();

    assert!(sound.set_property("Pan", "-0.5"));
    assert!(sound.set_property("stop_mode", "loop"));
    assert!(!sound.set_property("warp", "9"));
    assert!(!sound.set_property("volume", "loud"));
    assert_eq!(sound.params().pan, -0.5);
    assert_eq!(sound.params().stop_mode, Some(StopMode::Loop));
}

#[test]
fn test_loop_in_file_name_loops() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "engine_loop.wav", 441, 0.5);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, true).unwrap();
    sound.play(false, None);

    let mut buf = vec![0.0f32; 512 * 2];
    for _ in 0..8 {
        driver.pump(&engine, &mut buf, 512);
    }
    assert!(sound.is_playing());
    assert!(buf.iter().all(|s| *s == 0.5));
}

#[test]
fn test_looping_position_stays_within_length() {
    let dir = TempDir::new().unwrap();
    let path = constant_file(&dir, "engine_loop.wav", 4410, 0.5);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load(&path, true).unwrap();
    let length = sound.length_seconds().unwrap();
    sound.play(false, None);

    let mut buf = vec![0.0f32; 512 * 2];
    let mut previous = 0.0;
    let mut restarts = 0;
    for _ in 0..40 {
        driver.pump(&engine, &mut buf, 512);
        let position = sound.position_seconds();
        assert!(
            position <= length + 1e-9,
            "position {:.4}s past the {:.4}s loop",
            position,
            length
        );
        if position < previous {
            restarts += 1;
        }
        previous = position;
    }
    assert!(sound.is_playing());
    assert!(restarts >= 3, "only {} restarts seen", restarts);
}

#[test]
fn test_override_params_apply_to_one_play() {
    let (driver, engine) = manual_engine();
    let mut sound = Sound::new(Arc::clone(&engine));
    sound
        .load_reader(Box::new(MemoryReader::new(vec![0.5f32; 20_000], 44_100, 2)), "sfx")
        .unwrap();

    let quiet = SoundParams {
        volume: 0.5,
        ..SoundParams::default()
    };
    sound.play(false, Some(&quiet));

    let mut buf = vec![0.0f32; 256 * 2];
    driver.pump(&engine, &mut buf, 256);
    assert!(buf.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    assert_eq!(sound.params().volume, 1.0);
}
