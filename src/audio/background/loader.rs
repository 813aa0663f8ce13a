//! Decodes the background asset into a mono PCM bed at the leg's sample rate.
//!
//! Runs once per process at startup: probe -> decode every packet ->
//! downmix to mono -> linear resample. Any failure here is fatal for the
//! call leg; there is no degraded fallback.

use std::path::Path;

use symphonia::core::{audio::SampleBuffer, errors::Error, io::MediaSource};
use tracing::{Level, debug, info, span, warn};

use super::track::{BackgroundTrack, DecodedAsset};
use crate::{
    audio::{
        demux::{AudioFormat, OpenedFormat, open_format},
        resample::LinearResampler,
    },
    common::errors::{MixerError, MixerResult},
};

/// Decode the asset at `path` and return a looping track at `sample_rate`.
///
/// The extension only seeds the probe hint; the container itself is
/// recognised from its content.
pub fn load_background(path: impl AsRef<Path>, sample_rate: u32) -> MixerResult<BackgroundTrack> {
    let path = path.as_ref();
    let name = path.display().to_string();

    let file = std::fs::File::open(path).map_err(|e| MixerError::decode(&name, e))?;
    decode_source(Box::new(file), AudioFormat::from_path(path), &name, sample_rate)
}

/// Same as [`load_background`] for an asset already held in memory.
/// `source_name` is used for the hint and for error messages.
pub fn decode_background(
    bytes: Vec<u8>,
    source_name: &str,
    sample_rate: u32,
) -> MixerResult<BackgroundTrack> {
    decode_source(
        Box::new(std::io::Cursor::new(bytes)),
        AudioFormat::from_path(Path::new(source_name)),
        source_name,
        sample_rate,
    )
}

fn decode_source(
    source: Box<dyn MediaSource>,
    kind: AudioFormat,
    name: &str,
    sample_rate: u32,
) -> MixerResult<BackgroundTrack> {
    let _span = span!(Level::DEBUG, "background_decode", source = name).entered();

    let opened = open_format(source, kind).map_err(|e| MixerError::decode(name, e))?;
    let samples = decode_mono(opened, sample_rate).map_err(|e| MixerError::decode(name, e))?;

    info!(
        "Loaded background '{}': {} samples ({:.2}s @ {}Hz)",
        name,
        samples.len(),
        samples.len() as f64 / sample_rate as f64,
        sample_rate
    );

    Ok(BackgroundTrack::new(samples)?.with_handle(Box::new(DecodedAsset {
        source_name: name.to_string(),
    })))
}

fn decode_mono(opened: OpenedFormat, target_rate: u32) -> Result<Vec<i16>, Error> {
    let OpenedFormat {
        mut format,
        track_id,
        mut decoder,
        sample_rate,
        channels,
    } = opened;

    debug!(
        "Source: {:?}Hz {:?} channels, Target: {}Hz",
        sample_rate, channels, target_rate
    );

    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    let mut resampler: Option<LinearResampler> = None;
    let mut mono = Vec::new();
    let mut out = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => break,
            Err(e) => return Err(e),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let channels = spec.channels.count().max(1);
                let mut buf = sample_buf
                    .take()
                    .unwrap_or_else(|| SampleBuffer::<i16>::new(decoded.capacity() as u64, spec));
                buf.copy_interleaved_ref(decoded);

                downmix_into(buf.samples(), channels, &mut mono);

                let r = resampler.get_or_insert_with(|| LinearResampler::new(spec.rate, target_rate, 1));
                if r.is_passthrough() {
                    out.extend_from_slice(&mono);
                } else {
                    r.process(&mono, &mut out);
                }

                sample_buf = Some(buf);
            }
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::DecodeError(e)) => {
                warn!("Decode error (recoverable): {e}");
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(out)
}

/// Average interleaved frames down to one channel, replacing `mono`.
fn downmix_into(interleaved: &[i16], channels: usize, mono: &mut Vec<i16>) {
    mono.clear();
    if channels == 1 {
        mono.extend_from_slice(interleaved);
        return;
    }
    mono.extend(interleaved.chunks_exact(channels).map(|frame| {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        (sum / channels as i32) as i16
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        out.extend_from_slice(&(channels * 2).to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn decodes_mono_wav_at_target_rate() {
        let bytes = wav_bytes(16_000, 1, &vec![1234i16; 1_600]);
        let track = decode_background(bytes, "bed.wav", 16_000).unwrap();
        assert_eq!(track.len(), 1_600);
        assert!(track.samples().iter().all(|&s| s == 1234));
    }

    #[test]
    fn downmixes_and_resamples_stereo() {
        let interleaved: Vec<i16> = (0..800).flat_map(|_| [1000i16, 3000]).collect();
        let bytes = wav_bytes(8_000, 2, &interleaved);
        let track = decode_background(bytes, "stereo.wav", 16_000).unwrap();
        assert_eq!(track.len(), 1_600);
        assert!(track.samples().iter().all(|&s| s == 2000));
    }

    #[test]
    fn container_is_recognised_without_extension() {
        let bytes = wav_bytes(16_000, 1, &vec![-300i16; 480]);
        let track = decode_background(bytes, "ambience", 16_000).unwrap();
        assert_eq!(track.len(), 480);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_background(vec![0x42; 256], "noise.bin", 16_000).unwrap_err();
        assert!(matches!(err, MixerError::Decode { .. }));
    }

    #[test]
    fn silent_asset_is_fatal() {
        let bytes = wav_bytes(16_000, 1, &[]);
        let err = decode_background(bytes, "empty.wav", 16_000).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = load_background("/nonexistent/ambience.wav", 16_000).unwrap_err();
        match err {
            MixerError::Decode { source_name, .. } => {
                assert_eq!(source_name, "/nonexistent/ambience.wav")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn downmix_averages_channels() {
        let mut mono = Vec::new();
        downmix_into(&[100, 300, -50, 50], 2, &mut mono);
        assert_eq!(mono, vec![200, 0]);
    }
}
