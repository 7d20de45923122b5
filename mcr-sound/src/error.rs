//! Error types for mcr-sound
//!
//! Engine and handle operations return [`Error`]. Reader status codes
//! (would-block, end of file) are not errors and live in
//! [`crate::reader::ReadError`].

use thiserror::Error;

/// Main error type for mcr-sound
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the common crate
    #[error(transparent)]
    Common(#[from] mcr_common::Error),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Playback engine errors
    #[error("Playback error: {0}")]
    Playback(String),

    /// Every voice slot is busy
    #[error("No voice slot available ({0} in use)")]
    SlotExhausted(usize),

    /// Voice handle refers to a slot that has since been reused
    #[error("Stale voice handle (slot {index}, generation {generation})")]
    StaleHandle { index: usize, generation: u64 },

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using mcr-sound Error
pub type Result<T> = std::result::Result<T, Error>;
