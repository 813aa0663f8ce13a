//! The per-call foreground/background mixer.
//!
//! One [`Mixer::tick`] produces at most one frame:
//!
//! - **speaking**: pop the oldest pending chunk and blend it over an
//!   equal-length window of the background bed;
//! - **trailing**: the last consumed chunk was final and nothing is pending,
//!   so emit ambience only;
//! - **idle**: nothing pending and no final chunk yet, emit nothing.

use bytes::Bytes;
use tracing::{debug, trace};

use super::intake::PendingChunks;
use crate::{
    audio::{background::BackgroundTrack, pcm},
    common::{
        errors::{MixerError, MixerResult},
        types::PcmFormat,
    },
    configs::MixerConfig,
};

/// Gain pair; `foreground` is always `1 - background`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volumes {
    pub background: f32,
    pub foreground: f32,
}

impl Volumes {
    pub fn from_background(background: f32) -> MixerResult<Self> {
        if !(0.0..=1.0).contains(&background) {
            return Err(MixerError::InvalidConfig(format!(
                "background_volume must be within [0, 1], got {}",
                background
            )));
        }
        Ok(Self {
            background,
            foreground: 1.0 - background,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Speech blended over the bed.
    Speech,
    /// Bed only, between utterances.
    Ambience,
}

/// Output of one mix tick: little-endian i16 mono PCM.
#[derive(Debug, Clone)]
pub struct MixedFrame {
    pub pcm: Bytes,
    pub kind: FrameKind,
}

impl MixedFrame {
    pub fn samples(&self) -> usize {
        self.pcm.len() / 2
    }

    pub fn duration(&self, format: PcmFormat) -> std::time::Duration {
        format.duration_of(self.samples())
    }
}

/// `out[i] = clip(fg[i] * foreground + bg[i] * background)`.
///
/// All three slices must have the same length.
pub fn blend(fg: &[i16], bg: &[i16], volumes: Volumes, out: &mut [i16]) {
    for ((o, &f), &b) in out.iter_mut().zip(fg).zip(bg) {
        *o = pcm::clip(f as f32 * volumes.foreground + b as f32 * volumes.background);
    }
}

pub struct Mixer {
    track: BackgroundTrack,
    pending: PendingChunks,
    volumes: Volumes,
    /// Armed once a final chunk has been mixed; cleared by new speech.
    trailing: bool,
    idle_frame_samples: usize,
    trailing_limit: Option<usize>,
    trailing_emitted: usize,
    fg_buf: Vec<i16>,
    bg_buf: Vec<i16>,
    out_buf: Vec<i16>,
}

impl Mixer {
    pub fn new(track: BackgroundTrack, pending: PendingChunks, config: &MixerConfig) -> MixerResult<Self> {
        config.validate()?;
        let idle_frame_samples = config.idle_frame_samples();
        Ok(Self {
            track,
            pending,
            volumes: Volumes::from_background(config.background_volume)?,
            trailing: false,
            idle_frame_samples,
            trailing_limit: config.trailing_limit_samples(),
            trailing_emitted: 0,
            fg_buf: Vec::with_capacity(idle_frame_samples),
            bg_buf: Vec::with_capacity(idle_frame_samples),
            out_buf: Vec::with_capacity(idle_frame_samples),
        })
    }

    pub fn volumes(&self) -> Volumes {
        self.volumes
    }

    pub fn is_trailing(&self) -> bool {
        self.trailing
    }

    pub fn pending(&self) -> &PendingChunks {
        &self.pending
    }

    pub fn track(&self) -> &BackgroundTrack {
        &self.track
    }

    pub fn track_mut(&mut self) -> &mut BackgroundTrack {
        &mut self.track
    }

    /// Run one mix step. `None` means there is nothing to play yet.
    pub fn tick(&mut self) -> Option<MixedFrame> {
        while let Some(chunk) = self.pending.pop_front() {
            if chunk.is_final != self.trailing {
                debug!(
                    "{} after {}-sample chunk",
                    if chunk.is_final { "Utterance finished" } else { "Speech resumed" },
                    chunk.samples()
                );
            }
            self.trailing = chunk.is_final;
            self.trailing_emitted = 0;

            // An empty chunk only carries the end-of-utterance marker.
            if chunk.pcm.is_empty() {
                continue;
            }
            return Some(self.mix_speech(&chunk.pcm));
        }

        if self.trailing {
            return self.mix_ambience();
        }

        None
    }

    fn mix_speech(&mut self, chunk: &[u8]) -> MixedFrame {
        pcm::decode_into(chunk, &mut self.fg_buf);
        let n = self.fg_buf.len();

        // Exactly as many background samples as the chunk carries.
        self.bg_buf.resize(n, 0);
        self.track.read_into(&mut self.bg_buf);

        self.out_buf.resize(n, 0);
        blend(&self.fg_buf, &self.bg_buf, self.volumes, &mut self.out_buf);

        trace!("Mixed speech frame: {} samples", n);
        MixedFrame {
            pcm: pcm::encode(&self.out_buf),
            kind: FrameKind::Speech,
        }
    }

    fn mix_ambience(&mut self) -> Option<MixedFrame> {
        let n = match self.trailing_limit {
            Some(limit) => {
                let left = limit.saturating_sub(self.trailing_emitted);
                if left == 0 {
                    return None;
                }
                left.min(self.idle_frame_samples)
            }
            None => self.idle_frame_samples,
        };

        self.bg_buf.resize(n, 0);
        self.track.read_into(&mut self.bg_buf);

        let gain = self.volumes.background;
        self.out_buf.clear();
        self.out_buf
            .extend(self.bg_buf.iter().map(|&b| pcm::clip(b as f32 * gain)));

        self.trailing_emitted += n;
        Some(MixedFrame {
            pcm: pcm::encode(&self.out_buf),
            kind: FrameKind::Ambience,
        })
    }

    /// Hand the background track back, e.g. to release its asset handle.
    pub fn into_track(self) -> BackgroundTrack {
        self.track
    }
}
