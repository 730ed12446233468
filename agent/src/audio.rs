//! PCM buffer handed to the playback controller.
//!
//! Samples are stored as raw little-endian interleaved bytes together with
//! the format metadata needed to play them. Width 1 is unsigned 8-bit (the
//! WAV convention); widths 2 to 4 are signed integers.

use std::time::Duration;

use crate::error::PlaybackError;

/// Lowest accepted request volume.
pub const MIN_VOLUME: i64 = 0;

/// Highest accepted request volume (100 is unity gain).
pub const MAX_VOLUME: i64 = 200;

/// Raw PCM audio plus format metadata.
///
/// Immutable once constructed. The controller shares it with the session
/// worker through an `Arc` and never copies or mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    // ---
    data: Vec<u8>,
    channels: u16,
    sample_width: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    // ---
    /// Creates a buffer from raw interleaved sample bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the channel count is zero, the sample width
    /// is outside 1..=4 bytes, the sample rate is zero, or `data` does not hold
    /// a whole number of frames.
    pub fn new(
        data: Vec<u8>,
        channels: u16,
        sample_width: u16,
        sample_rate: u32,
    ) -> Result<Self, PlaybackError> {
        // ---
        if channels == 0 {
            return Err(PlaybackError::InvalidFormat("channel count is zero".into()));
        }
        if !(1..=4).contains(&sample_width) {
            return Err(PlaybackError::InvalidFormat(format!(
                "unsupported sample width: {sample_width} bytes"
            )));
        }
        if sample_rate == 0 {
            return Err(PlaybackError::InvalidFormat("sample rate is zero".into()));
        }

        let frame_bytes = channels as usize * sample_width as usize;
        if data.len() % frame_bytes != 0 {
            return Err(PlaybackError::InvalidFormat(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                frame_bytes
            )));
        }

        Ok(Self {
            data,
            channels,
            sample_width,
            sample_rate,
        })
    }

    /// Creates a 16-bit buffer from interleaved samples.
    pub fn from_i16(
        samples: &[i16],
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, PlaybackError> {
        // ---
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data, channels, 2, sample_rate)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bytes per sample.
    pub fn sample_width(&self) -> u16 {
        self.sample_width
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total number of samples across all channels.
    pub fn sample_count(&self) -> usize {
        // ---
        self.data.len() / self.sample_width as usize
    }

    /// Number of sample frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        // ---
        self.sample_count() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Playback duration at the native sample rate.
    pub fn duration(&self) -> Duration {
        // ---
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Returns sample `index` normalized to [-1.0, 1.0].
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.sample_count()`.
    pub fn sample_f32(&self, index: usize) -> f32 {
        // ---
        let width = self.sample_width as usize;
        let raw = read_sample(&self.data[index * width..(index + 1) * width]);
        raw as f32 / full_scale(self.sample_width) as f32
    }

    /// Converts the whole buffer to normalized interleaved floats.
    pub fn to_f32(&self) -> Vec<f32> {
        // ---
        (0..self.sample_count()).map(|i| self.sample_f32(i)).collect()
    }

    /// Returns a copy with `gain_db` applied, saturating at full scale.
    pub fn with_gain_db(&self, gain_db: f64) -> AudioBuffer {
        // ---
        if gain_db == 0.0 {
            return self.clone();
        }

        let factor = 10f64.powf(gain_db / 20.0);
        let width = self.sample_width as usize;
        let max = full_scale(self.sample_width) - 1;
        let min = -full_scale(self.sample_width);

        let mut data = Vec::with_capacity(self.data.len());
        for chunk in self.data.chunks_exact(width) {
            let scaled = (read_sample(chunk) as f64 * factor).round() as i64;
            let clamped = scaled.clamp(min, max);
            write_sample(&mut data, clamped, width);
        }

        AudioBuffer { data, ..*self }
    }
}

/// Maps a request volume (percent, 100 = unity) to a gain in decibels.
///
/// The scale is additive: every point below 100 is one decibel quieter,
/// every point above is one louder.
///
/// # Errors
///
/// Returns `InvalidVolume` outside [`MIN_VOLUME`]..=[`MAX_VOLUME`].
pub fn volume_to_gain_db(volume: i64) -> Result<f64, PlaybackError> {
    // ---
    if !(MIN_VOLUME..=MAX_VOLUME).contains(&volume) {
        return Err(PlaybackError::InvalidVolume(volume));
    }
    Ok((volume - 100) as f64)
}

fn full_scale(width: u16) -> i64 {
    1i64 << (width * 8 - 1)
}

/// Decodes one little-endian sample into a signed value centered on zero.
fn read_sample(bytes: &[u8]) -> i64 {
    // ---
    match bytes.len() {
        1 => bytes[0] as i64 - 128,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        3 => {
            let unsigned = bytes[0] as i32 | (bytes[1] as i32) << 8 | (bytes[2] as i32) << 16;
            // Sign-extend from 24 bits
            ((unsigned << 8) >> 8) as i64
        }
        _ => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
    }
}

fn write_sample(out: &mut Vec<u8>, value: i64, width: usize) {
    // ---
    match width {
        1 => out.push((value + 128) as u8),
        2 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        3 => out.extend_from_slice(&(value as i32).to_le_bytes()[..3]),
        _ => out.extend_from_slice(&(value as i32).to_le_bytes()),
    }
}
