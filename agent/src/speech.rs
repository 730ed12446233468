//! Text-to-speech producers.
//!
//! Synthesis is delegated to an external engine that yields WAV bytes; the
//! agent then decodes them like any other stream.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::error::PlaybackError;

/// Produces spoken audio for a message.
pub trait SpeechSynthesizer: Send + Sync {
    // ---
    /// Returns a complete WAV file containing `text` spoken aloud.
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlaybackError>;
}

/// SVOX Pico via the `pico2wave` command line tool.
#[derive(Debug, Clone)]
pub struct Pico2Wave {
    // ---
    program: PathBuf,
    language: String,
}

impl Pico2Wave {
    // ---
    /// Uses `pico2wave` from `PATH` with the given language (e.g. `en-US`).
    pub fn new(language: impl Into<String>) -> Self {
        // ---
        Self::with_program("pico2wave", language)
    }

    pub fn with_program(program: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        // ---
        Self {
            program: program.into(),
            language: language.into(),
        }
    }
}

impl SpeechSynthesizer for Pico2Wave {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlaybackError> {
        // ---
        if text.trim().is_empty() {
            return Err(PlaybackError::Synthesis("message is empty".into()));
        }

        // pico2wave insists on a .wav output path
        let output = TempWav::new();
        debug!(
            "Running {} -l {} -w {}",
            self.program.display(),
            self.language,
            output.path.display()
        );

        let status = Command::new(&self.program)
            .arg("-l")
            .arg(&self.language)
            .arg("-w")
            .arg(&output.path)
            .arg("--")
            .arg(text)
            .status()
            .map_err(|e| {
                PlaybackError::Synthesis(format!("failed to run {}: {e}", self.program.display()))
            })?;

        if !status.success() {
            return Err(PlaybackError::Synthesis(format!(
                "{} exited with {status}",
                self.program.display()
            )));
        }

        fs::read(&output.path)
            .map_err(|e| PlaybackError::Synthesis(format!("no audio produced: {e}")))
    }
}

/// Temporary WAV path removed on drop.
struct TempWav {
    path: PathBuf,
}

impl TempWav {
    fn new() -> Self {
        // ---
        let name = format!("chime-tts-{}-{:016x}.wav", std::process::id(), rand::random::<u64>());
        Self {
            path: std::env::temp_dir().join(name),
        }
    }
}

impl Drop for TempWav {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn empty_message_is_rejected() {
        // ---
        let tts = Pico2Wave::new("en-US");
        assert!(matches!(tts.synthesize("   "), Err(PlaybackError::Synthesis(_))));
    }

    #[test]
    fn missing_program_is_a_synthesis_error() {
        // ---
        let tts = Pico2Wave::with_program("/nonexistent/pico2wave", "de-DE");
        let err = tts.synthesize("Hallo").expect_err("should fail");
        assert!(err.to_string().contains("failed to run"));
    }

    #[test]
    fn failing_program_is_a_synthesis_error() {
        // ---
        let tts = Pico2Wave::with_program("false", "en-US");
        assert!(matches!(tts.synthesize("hello"), Err(PlaybackError::Synthesis(_))));
    }

    #[test]
    fn temp_path_is_removed_on_drop() {
        // ---
        let tmp = TempWav::new();
        fs::write(&tmp.path, b"RIFF").expect("write");
        let path = tmp.path.clone();
        drop(tmp);
        assert!(!path.exists());
    }
}
