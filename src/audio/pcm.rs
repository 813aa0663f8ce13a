//! Little-endian i16 PCM <-> byte conversion helpers.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::{
    audio::constants::{BYTES_PER_SAMPLE, INT16_MAX_F, INT16_MIN_F},
    common::errors::{MixerError, MixerResult},
};

/// Number of whole samples in `bytes`, or `FormatMismatch` for a torn sample.
pub fn sample_count(bytes: &[u8]) -> MixerResult<usize> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(MixerError::FormatMismatch(format!(
            "{} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }
    Ok(bytes.len() / BYTES_PER_SAMPLE)
}

/// Decode `bytes` into `out`, resizing it to the sample count.
///
/// `bytes` must already have passed [`sample_count`].
pub fn decode_into(bytes: &[u8], out: &mut Vec<i16>) {
    let n = bytes.len() / BYTES_PER_SAMPLE;
    out.resize(n, 0);
    LittleEndian::read_i16_into(&bytes[..n * BYTES_PER_SAMPLE], out);
}

pub fn encode(samples: &[i16]) -> Bytes {
    let mut buf = vec![0u8; samples.len() * BYTES_PER_SAMPLE];
    LittleEndian::write_i16_into(samples, &mut buf);
    Bytes::from(buf)
}

/// Saturating float -> i16 conversion. Out-of-range values clamp, never wrap.
#[inline]
pub fn clip(value: f32) -> i16 {
    value.clamp(INT16_MIN_F, INT16_MAX_F) as i16
}
