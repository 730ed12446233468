//! Domain errors surfaced to HTTP callers.
//!
//! Anything here is the caller's fault or a content problem (bad filename,
//! undecodable audio, invalid repeat count) and maps to a 400 response.
//! Infrastructure failures travel as `anyhow::Error` instead.

use thiserror::Error;

/// Reasons a playback request is refused before any session is started.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Illegal filename")]
    IllegalFilename,

    #[error("Unsupported file extension")]
    UnsupportedExtension,

    #[error("File not found")]
    FileNotFound,

    #[error("Error decoding audio: {0}")]
    Decode(String),

    #[error("Error synthesizing speech: {0}")]
    Synthesis(String),

    #[error("Invalid playback policy: {0}")]
    InvalidPolicy(String),

    #[error("Volume must be between 0 and 200, got {0}")]
    InvalidVolume(i64),

    #[error("Audio buffer contains no sample frames")]
    EmptyAudio,

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),
}

impl From<hound::Error> for PlaybackError {
    fn from(e: hound::Error) -> Self {
        PlaybackError::Decode(e.to_string())
    }
}

impl From<symphonia::core::errors::Error> for PlaybackError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        PlaybackError::Decode(e.to_string())
    }
}
