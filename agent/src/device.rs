//! Output device abstraction and the cpal-backed implementation.
//!
//! The controller only needs three things from a device: submit a whole
//! buffer, ask whether it is still playing, and stop it. Dropping the handle
//! releases the device.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{debug, info, warn};

use crate::audio::AudioBuffer;

/// A sink that can play one buffer at a time.
pub trait OutputDevice: Send + Sync {
    // ---
    /// Starts playing `audio` and returns a handle to the running playback.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be claimed or configured.
    fn submit(&self, audio: &AudioBuffer) -> Result<Box<dyn PlaybackHandle>>;
}

/// A single in-flight playback on an [`OutputDevice`].
pub trait PlaybackHandle {
    // ---
    /// True until every sample has been handed to the hardware.
    fn is_playing(&self) -> bool;

    /// Halts playback immediately. Idempotent.
    fn stop(&mut self);

    /// True if the device went away or reported an error mid-playback.
    fn failed(&self) -> bool {
        false
    }
}

/// Plays through cpal on the default host.
///
/// The output stream is opened per submission and closed when the handle is
/// dropped, so the device is only held while a session is playing.
#[derive(Debug, Clone, Default)]
pub struct CpalDevice {
    // ---
    device_name: Option<String>,
}

impl CpalDevice {
    // ---
    /// Uses the host's default output device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the output device whose name matches `name` exactly.
    pub fn named(name: impl Into<String>) -> Self {
        // ---
        Self {
            device_name: Some(name.into()),
        }
    }

    fn open_device(&self) -> Result<Device> {
        // ---
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_output_device()
                .context("no output device available"),
            Some(name) => host
                .output_devices()
                .context("failed to enumerate output devices")?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .with_context(|| format!("output device not found: {name}")),
        }
    }

    /// Logs the device that would be used, failing early if there is none.
    pub fn check_ready(&self) -> Result<()> {
        // ---
        let device = self.open_device()?;
        let config = device
            .default_output_config()
            .context("failed to query output config")?;
        info!(
            "Audio device: {} ({}Hz, {} channels, {:?})",
            device.name().unwrap_or_else(|_| "<unnamed>".into()),
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );
        Ok(())
    }
}

impl OutputDevice for CpalDevice {
    fn submit(&self, audio: &AudioBuffer) -> Result<Box<dyn PlaybackHandle>> {
        // ---
        let device = self.open_device()?;
        let supported = device
            .default_output_config()
            .context("failed to query output config")?;
        let config: StreamConfig = supported.config();
        debug!("Stream config: {:?}", config);

        let samples = Arc::new(convert_for_device(
            audio,
            config.channels,
            config.sample_rate.0,
        ));
        let state = Arc::new(StreamState::default());

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, samples, Arc::clone(&state)),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, samples, Arc::clone(&state)),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, samples, Arc::clone(&state)),
            other => anyhow::bail!("unsupported device sample format: {other:?}"),
        }?;

        stream.play().context("failed to start audio stream")?;

        Ok(Box::new(CpalPlayback {
            stream,
            state,
            stopped: false,
        }))
    }
}

/// Progress shared between a playback handle and its audio callback.
#[derive(Default)]
struct StreamState {
    position: AtomicUsize,
    drained: AtomicBool,
    failed: AtomicBool,
}

struct CpalPlayback {
    stream: Stream,
    state: Arc<StreamState>,
    stopped: bool,
}

impl PlaybackHandle for CpalPlayback {
    fn is_playing(&self) -> bool {
        // ---
        !self.stopped
            && !self.state.drained.load(Ordering::Acquire)
            && !self.state.failed.load(Ordering::Acquire)
    }

    fn stop(&mut self) {
        // ---
        if !self.stopped {
            self.stopped = true;
            if let Err(e) = self.stream.pause() {
                debug!("Pausing stream on stop failed: {}", e);
            }
        }
    }

    fn failed(&self) -> bool {
        self.state.failed.load(Ordering::Acquire)
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Arc<Vec<f32>>,
    state: Arc<StreamState>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    // ---
    let err_state = Arc::clone(&state);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_period(data, &samples, &state);
            },
            move |err| {
                warn!("Audio stream error: {}", err);
                err_state.failed.store(true, Ordering::Release);
            },
            None,
        )
        .context("failed to build output stream")?;

    Ok(stream)
}

/// Writes the next period of `samples` into `data`, padding with silence.
///
/// `drained` is only raised on a callback that starts past the end, so the
/// period carrying the last real samples is handed to the device first.
fn fill_period<T>(data: &mut [T], samples: &[f32], state: &StreamState)
where
    T: SizedSample + FromSample<f32>,
{
    // ---
    let start = state.position.load(Ordering::Relaxed);
    if start >= samples.len() {
        data.fill(T::EQUILIBRIUM);
        state.drained.store(true, Ordering::Release);
        return;
    }

    let end = (start + data.len()).min(samples.len());
    let written = end - start;
    for (out, &sample) in data.iter_mut().zip(&samples[start..end]) {
        *out = T::from_sample(sample);
    }
    data[written..].fill(T::EQUILIBRIUM);
    state.position.store(end, Ordering::Relaxed);
}

/// Converts a buffer to interleaved floats in the device's layout.
///
/// Channels are averaged down to mono, duplicated up from mono, or otherwise
/// mapped by index. Rate conversion is linear interpolation, which is plenty
/// for chimes and speech.
pub fn convert_for_device(audio: &AudioBuffer, out_channels: u16, out_rate: u32) -> Vec<f32> {
    // ---
    let in_channels = audio.channels() as usize;
    let out_channels = out_channels.max(1) as usize;
    let frames = audio.frame_count();
    let input = audio.to_f32();

    let mut mapped = Vec::with_capacity(frames * out_channels);
    for frame in input.chunks_exact(in_channels) {
        for c in 0..out_channels {
            let value = if out_channels == 1 {
                frame.iter().sum::<f32>() / in_channels as f32
            } else if in_channels == 1 {
                frame[0]
            } else {
                frame[c.min(in_channels - 1)]
            };
            mapped.push(value);
        }
    }

    resample_linear(&mapped, out_channels, audio.sample_rate(), out_rate)
}

/// Resamples interleaved audio using linear interpolation.
fn resample_linear(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
    // ---
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let in_frames = samples.len() / channels;
    let ratio = from_rate as f64 / to_rate as f64;
    let out_frames = (in_frames as f64 / ratio) as usize;
    let mut resampled = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        for c in 0..channels {
            if src_idx + 1 >= in_frames {
                resampled.push(samples[(in_frames - 1) * channels + c]);
            } else {
                let s0 = samples[src_idx * channels + c];
                let s1 = samples[(src_idx + 1) * channels + c];
                resampled.push(s0 + (s1 - s0) * frac);
            }
        }
    }

    resampled
}
