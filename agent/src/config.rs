//! Runtime configuration for the agent.
//!
//! The binary builds this from command-line flags and their environment
//! variable fallbacks; tests construct it directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::controller::ControllerConfig;
use crate::tone::ToneSpec;

/// Default HTTP port for the request API.
pub const DEFAULT_PORT: u16 = 5000;

/// Default directory holding the playable sound library.
pub const DEFAULT_AUDIO_DIR: &str = "audio-files/";

/// Default text-to-speech language.
pub const DEFAULT_TTS_LANG: &str = "en-US";

/// Everything the request layer needs to know about its environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // ---
    /// Address the HTTP API binds to.
    pub bind: SocketAddr,

    /// Directory that `/play` and `/loop` filenames are resolved in.
    pub audio_dir: PathBuf,

    /// Language passed to the speech synthesizer.
    pub tts_language: String,

    /// Identity reported by `GET /info`.
    pub name: String,

    /// Waveform used by `/beep`.
    pub tone: ToneSpec,

    pub controller: ControllerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            audio_dir: PathBuf::from(DEFAULT_AUDIO_DIR),
            tts_language: DEFAULT_TTS_LANG.to_string(),
            name: "chime".to_string(),
            tone: ToneSpec::default(),
            controller: ControllerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_values() {
        // ---
        let config = AgentConfig::default();
        assert_eq!(config.bind.port(), 5000);
        assert!(config.bind.ip().is_unspecified());
        assert_eq!(config.audio_dir, PathBuf::from("audio-files/"));
        assert_eq!(config.tts_language, "en-US");
        assert_eq!(config.controller.max_duration, Duration::from_secs(60));
    }
}
