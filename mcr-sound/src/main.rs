//! Command-line player (mcr-play)
//!
//! Plays one or more files through the mixing engine, either as separate
//! sounds or, with `--chain-offset-ms`, as one sound chain with the files
//! spaced evenly apart. Prints the position once per second and exits when
//! everything has finished.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mcr_common::SoundConfig;
use mcr_sound::audio::{CpalDriver, OutputConfig};
use mcr_sound::playback::{EngineConfig, MixingEngine, Sound, SoundParams};
use mcr_sound::reader::{SoundChain, StopMode};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for mcr-play
#[derive(Parser, Debug)]
#[command(name = "mcr-play")]
#[command(about = "Play audio files through the McRhythm sound engine")]
#[command(version)]
struct Args {
    /// Audio files to play
    #[arg(required_unless_present = "list_devices")]
    files: Vec<PathBuf>,

    /// Configuration file (overrides MCR_SOUND_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Decode files fully into memory before playing
    #[arg(long)]
    precache: bool,

    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    #[arg(long, default_value_t = 1.0)]
    pitch: f64,

    #[arg(long, default_value_t = 1.0)]
    volume: f64,

    /// Loop until interrupted
    #[arg(long = "loop")]
    looping: bool,

    /// Start position in seconds
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Play all files as one chain, each starting this many ms after the previous
    #[arg(long)]
    chain_offset_ms: Option<i64>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn init_tracing(level: &str) {
    let default_filter = format!("mcr_sound={},mcr_common={}", level, level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SoundConfig::load(args.config.as_deref());
    if args.device.is_some() {
        config.output_device = args.device.clone();
    }
    init_tracing(&config.logging.level);

    if args.list_devices {
        for name in CpalDriver::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut driver = CpalDriver::init(&OutputConfig::from_sound_config(&config))
        .context("Failed to open audio output")?;
    let engine = Arc::new(
        MixingEngine::new(driver.clock(), &EngineConfig::from_sound_config(&config))
            .context("Failed to start mixing engine")?,
    );
    driver
        .start(Arc::clone(&engine))
        .context("Failed to start audio stream")?;
    info!("Playing on {}", driver.device_name());

    let params = SoundParams {
        volume: args.volume,
        pitch: args.pitch,
        speed: args.speed,
        stop_mode: args.looping.then_some(StopMode::Loop),
        ..SoundParams::default()
    };

    let mut sounds = Vec::new();
    match args.chain_offset_ms {
        Some(offset_ms) => {
            let mut chain = SoundChain::new(engine.sample_rate());
            for (i, file) in args.files.iter().enumerate() {
                let index = chain
                    .add_sound(file)
                    .with_context(|| format!("Failed to load {}", file.display()))?;
                chain.add_sub_sound(index, offset_ms * i as i64, 0.0)?;
            }
            chain.finish();

            let mut sound = Sound::new(Arc::clone(&engine));
            sound
                .load_reader(Box::new(chain), "chain")
                .context("Failed to prepare chain")?;
            sounds.push(sound);
        }
        None => {
            for file in &args.files {
                let mut sound = Sound::new(Arc::clone(&engine));
                if let Err(e) = sound.load(file, args.precache) {
                    error!("Skipping {}: {}", file.display(), e);
                    continue;
                }
                sounds.push(sound);
            }
        }
    }

    for sound in &mut sounds {
        sound.set_params(params.clone());
        if args.start > 0.0 {
            sound.set_position_seconds(args.start);
        }
        sound.play(false, None);
    }

    while sounds.iter().any(Sound::is_playing) {
        std::thread::sleep(Duration::from_secs(1));
        for sound in &sounds {
            let length = sound
                .length_seconds()
                .map(|s| format!("{:.1}s", s))
                .unwrap_or_else(|| "?".to_string());
            println!(
                "{}: {:.1}s / {}",
                sound.name(),
                sound.position_seconds(),
                length
            );
        }
    }

    for sound in &sounds {
        if let Some(message) = sound.error() {
            error!("{}: {}", sound.name(), message);
        }
    }

    drop(sounds);
    engine.shutdown();
    driver.stop().context("Failed to stop audio stream")?;
    info!("Done");
    Ok(())
}
