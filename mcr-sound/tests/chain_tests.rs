//! Sound chain tests with decoded files

mod helpers;

use helpers::{manual_engine, write_constant_wav, TEST_SAMPLE_RATE};
use mcr_sound::playback::Sound;
use mcr_sound::reader::{MemoryReader, ReadError, SeekResult, SoundChain, SoundReader};
use std::sync::Arc;
use tempfile::TempDir;

/// Chain with an empty sound at 0 ms and two 2000-frame sounds at 10 ms
fn offset_chain(dir: &TempDir) -> SoundChain {
    let quiet = dir.path().join("quiet.wav");
    let loud = dir.path().join("loud.wav");
    write_constant_wav(&quiet, TEST_SAMPLE_RATE, 2, 2_000, 0.25).unwrap();
    write_constant_wav(&loud, TEST_SAMPLE_RATE, 2, 2_000, 0.5).unwrap();

    let mut chain = SoundChain::new(TEST_SAMPLE_RATE);
    let empty = chain.add_reader(Box::new(MemoryReader::new(Vec::<f32>::new(), TEST_SAMPLE_RATE, 1)));
    let a = chain.add_sound(&quiet).unwrap();
    let b = chain.add_sound(&loud).unwrap();

    // Added out of order on purpose
    chain.add_sub_sound(b, 10, 0.0).unwrap();
    chain.add_sub_sound(empty, 0, 0.0).unwrap();
    chain.add_sub_sound(a, 10, 0.0).unwrap();
    chain.finish();
    chain
}

fn read_to_end(reader: &mut dyn SoundReader) -> Vec<f32> {
    let channels = reader.num_channels();
    let mut out = Vec::new();
    let mut buf = vec![0.0f32; 300 * channels];
    loop {
        match reader.read(&mut buf, 300) {
            Ok(n) => out.extend_from_slice(&buf[..n * channels]),
            Err(ReadError::EndOfFile) => break,
            Err(e) => panic!("unexpected {:?}", e),
        }
    }
    out
}

#[test]
fn test_offset_sounds_start_on_their_frame() {
    let dir = TempDir::new().unwrap();
    let mut chain = offset_chain(&dir);
    assert_eq!(chain.num_channels(), 2);
    assert_eq!(chain.length_frames(), Some(441 + 2_000));

    let samples = read_to_end(&mut chain);
    assert_eq!(samples.len(), (441 + 2_000) * 2);
    assert!(samples[..441 * 2].iter().all(|s| *s == 0.0));
    assert!(samples[441 * 2..].iter().all(|s| *s == 0.75));
}

#[test]
fn test_seek_into_the_overlap() {
    let dir = TempDir::new().unwrap();
    let mut chain = offset_chain(&dir);

    assert_eq!(chain.set_position(1_441), SeekResult::Ok);
    let samples = read_to_end(&mut chain);
    assert_eq!(samples.len(), 1_000 * 2);
    assert!(samples.iter().all(|s| *s == 0.75));
}

#[test]
fn test_copies_play_independently() {
    let dir = TempDir::new().unwrap();
    let mut chain = offset_chain(&dir);
    let mut copy = chain.try_clone().unwrap();

    let mut buf = vec![0.0f32; 600 * 2];
    while chain.read(&mut buf, 600).is_ok() {}

    let samples = read_to_end(&mut *copy);
    assert_eq!(samples.len(), (441 + 2_000) * 2);
}

#[test]
fn test_chain_plays_through_the_engine() {
    let dir = TempDir::new().unwrap();
    let chain = offset_chain(&dir);
    let (driver, engine) = manual_engine();

    let mut sound = Sound::new(Arc::clone(&engine));
    sound.load_reader(Box::new(chain), "offsets").unwrap();
    assert!(sound.play(false, None));

    let mut buf = vec![1.0f32; 1_024 * 2];
    driver.pump(&engine, &mut buf, 1_024);
    assert!(buf[..441 * 2].iter().all(|s| *s == 0.0));
    assert!(buf[441 * 2..].iter().all(|s| *s == 0.75));
}
