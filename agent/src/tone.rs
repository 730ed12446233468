//! Beep waveform generator.

use std::f32::consts::PI;

use crate::audio::AudioBuffer;
use crate::error::PlaybackError;

const FADE_MS: u32 = 5;

/// Shape of one beep period: a sine burst followed by silence.
///
/// A beep pattern is this period played N times by the controller's repeat
/// policy, so the trailing gap is what separates consecutive beeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    // ---
    pub frequency_hz: f32,
    pub tone_ms: u32,
    pub gap_ms: u32,
    pub sample_rate: u32,
    /// Peak amplitude in (0.0, 1.0].
    pub amplitude: f32,
}

impl Default for ToneSpec {
    fn default() -> Self {
        Self {
            frequency_hz: 880.0,
            tone_ms: 150,
            gap_ms: 100,
            sample_rate: 44100,
            amplitude: 0.5,
        }
    }
}

impl ToneSpec {
    // ---
    /// Renders one period as 16-bit mono PCM.
    ///
    /// The burst gets a short linear fade at both ends so back-to-back
    /// repeats do not click.
    pub fn render(&self) -> Result<AudioBuffer, PlaybackError> {
        // ---
        if self.tone_ms == 0 || self.sample_rate == 0 {
            return Err(PlaybackError::InvalidFormat("empty tone".into()));
        }

        let tone_len = samples_for(self.tone_ms, self.sample_rate);
        let gap_len = samples_for(self.gap_ms, self.sample_rate);
        let fade_len = samples_for(FADE_MS, self.sample_rate).min(tone_len / 2).max(1);
        let amplitude = self.amplitude.clamp(0.0, 1.0) * i16::MAX as f32;

        let mut samples = Vec::with_capacity(tone_len + gap_len);
        for n in 0..tone_len {
            let t = n as f32 / self.sample_rate as f32;
            let envelope = (n.min(tone_len - 1 - n) as f32 / fade_len as f32).min(1.0);
            let value = (2.0 * PI * self.frequency_hz * t).sin() * amplitude * envelope;
            samples.push(value.round() as i16);
        }
        samples.resize(tone_len + gap_len, 0);

        AudioBuffer::from_i16(&samples, 1, self.sample_rate)
    }
}

fn samples_for(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}
