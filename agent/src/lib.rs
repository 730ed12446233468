//! Chime agent library.
//!
//! A network-triggered audio player: HTTP requests name a library sound, a
//! beep pattern, or a message to speak, and the [`PlaybackController`] plays
//! it on the output device, preempting whatever was playing before.
//!
//! The pieces, leaf first:
//! - [`decode`], [`tone`], [`speech`]: producers of [`AudioBuffer`]s
//! - [`device`]: the output device seam and its cpal implementation
//! - [`controller`] / [`session`]: one-session-at-a-time playback
//! - [`api`]: the HTTP surface

pub mod api;
pub mod audio;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod error;
pub mod session;
pub mod speech;
pub mod tone;

pub use api::{handle_request, serve, AgentContext, MAX_BODY_BYTES};
pub use audio::{volume_to_gain_db, AudioBuffer};
pub use config::AgentConfig;
pub use controller::{ControllerConfig, PlaybackController, PlaybackPolicy};
pub use device::{CpalDevice, OutputDevice, PlaybackHandle};
pub use error::PlaybackError;
pub use session::SessionEnd;
pub use speech::{Pico2Wave, SpeechSynthesizer};
pub use tone::ToneSpec;
