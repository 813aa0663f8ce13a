//! Container probing for the background asset.
//!
//! Symphonia recognises the container from its content; the extension hint
//! only saves it some scanning.

use symphonia::core::{
    codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions},
    errors::Error,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};

pub use crate::common::types::AudioFormat;

/// A probed container with its first decodable track selected.
pub struct OpenedFormat {
    pub format: Box<dyn FormatReader>,
    pub track_id: u32,
    pub decoder: Box<dyn Decoder>,
    /// `None` when the container does not declare it up front.
    pub sample_rate: Option<u32>,
    pub channels: Option<usize>,
}

/// Open a media source and pick the first track with a known codec.
pub fn open_format(source: Box<dyn MediaSource>, kind: AudioFormat) -> Result<OpenedFormat, Error> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    let ext = kind.as_ext();
    if !ext.is_empty() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no audio track found",
            ))
        })?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate;
    let channels = track.codec_params.channels.map(|c| c.count());
    let decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    Ok(OpenedFormat {
        format,
        track_id,
        decoder,
        sample_rate,
        channels,
    })
}
