//! PCM Source: turns library files and in-memory streams into [`AudioBuffer`]s.
//!
//! WAV goes through `hound`; compressed formats (MP3, Ogg Vorbis) are sniffed
//! and decoded with `symphonia`. Output is always interleaved 16-bit PCM at
//! the source's own channel count and sample rate. Conversion to the device
//! format happens at submission time in [`crate::device`].

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::audio::AudioBuffer;
use crate::error::PlaybackError;

/// File extensions accepted from the audio library.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg"];

/// Validates a client-supplied filename and resolves it inside `audio_dir`.
///
/// The name must be a bare file name (no `..`, `/` or `\`), carry one of
/// [`ALLOWED_EXTENSIONS`] (case-insensitive), and name an existing regular
/// file.
pub fn resolve_library_file(audio_dir: &Path, filename: &str) -> Result<PathBuf, PlaybackError> {
    // ---
    if filename.is_empty() || ["..", "/", "\\"].iter().any(|bad| filename.contains(bad)) {
        return Err(PlaybackError::IllegalFilename);
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or(PlaybackError::UnsupportedExtension)?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(PlaybackError::UnsupportedExtension);
    }

    let path = audio_dir.join(filename);
    debug!("Resolved library file: {}", path.display());

    if !path.is_file() {
        return Err(PlaybackError::FileNotFound);
    }

    Ok(path)
}

/// Reads and decodes an audio file, using its extension as a format hint.
pub fn decode_file(path: &Path) -> Result<AudioBuffer, PlaybackError> {
    // ---
    info!("Decoding audio file: {}", path.display());

    let bytes = fs::read(path)
        .map_err(|e| PlaybackError::Decode(format!("failed to read {}: {e}", path.display())))?;
    let hint = path.extension().and_then(|e| e.to_str());

    decode_bytes(&bytes, hint)
}

/// Decodes an in-memory audio stream.
///
/// RIFF/WAVE data is detected by its header regardless of `hint`.
///
/// # Errors
///
/// Returns `Decode` if the data cannot be parsed or holds no audio frames.
pub fn decode_bytes(bytes: &[u8], hint: Option<&str>) -> Result<AudioBuffer, PlaybackError> {
    // ---
    let audio = if is_riff_wave(bytes) {
        decode_wav(bytes)?
    } else {
        decode_compressed(bytes, hint)?
    };

    if audio.is_empty() {
        return Err(PlaybackError::Decode("no audio frames".into()));
    }

    info!(
        "Decoded {:.2}s of audio: {}Hz, {} channels",
        audio.duration().as_secs_f64(),
        audio.sample_rate(),
        audio.channels()
    );

    Ok(audio)
}

fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, PlaybackError> {
    // ---
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    debug!(
        "WAV format: {}Hz, {} channels, {} bits {:?}",
        spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
    );

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        // hound widens 8-bit samples to signed values
        (SampleFormat::Int, bits) if bits <= 8 => reader
            .samples::<i8>()
            .map(|s| s.map(|v| (v as i16) << 8))
            .collect::<Result<_, _>>()?,

        (SampleFormat::Int, bits) if bits <= 16 => {
            reader.samples::<i16>().collect::<Result<_, _>>()?
        }

        (SampleFormat::Int, bits) if bits <= 32 => {
            let shift = bits - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<Result<_, _>>()?
        }

        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()?,

        (format, bits) => {
            return Err(PlaybackError::Decode(format!(
                "unsupported WAV sample format: {bits}-bit {format:?}"
            )));
        }
    };

    AudioBuffer::from_i16(&samples, spec.channels, spec.sample_rate)
}

fn decode_compressed(bytes: &[u8], hint: Option<&str>) -> Result<AudioBuffer, PlaybackError> {
    // ---
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut format_hint = Hint::new();
    if let Some(ext) = hint {
        format_hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe().format(
        &format_hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = detected.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PlaybackError::Decode("no playable audio track".into()))?;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<i16> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    let mut channels = 0u16;
    let mut sample_rate = 0u32;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let buf = sample_buf.get_or_insert_with(|| {
                    channels = spec.channels.count() as u16;
                    sample_rate = spec.rate;
                    SampleBuffer::<i16>::new(decoded.capacity() as u64, spec)
                });
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frames are skipped, matching most players
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if sample_buf.is_none() {
        return Err(PlaybackError::Decode("stream contained no audio".into()));
    }

    AudioBuffer::from_i16(&samples, channels, sample_rate)
}
