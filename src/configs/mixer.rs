use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    audio::constants::{
        DEFAULT_BACKGROUND_VOLUME, DEFAULT_DRAIN_WAIT_MS, DEFAULT_IDLE_POLL_MS,
        DEFAULT_SEND_TIMEOUT_MS, DEFAULT_TICK_INTERVAL_MS, TELEPHONY_CHUNK_SIZE,
        TELEPHONY_SAMPLE_RATE,
    },
    common::{
        errors::{MixerError, MixerResult},
        types::PcmFormat,
    },
};

/// `[mixer]` table: everything one call leg's engine needs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MixerConfig {
    /// Sample rate shared by the background bed and incoming speech.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Transport sub-chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Background gain in `[0, 1]`; speech gets `1 - background_volume`.
    #[serde(default = "default_background_volume")]
    pub background_volume: f32,
    #[serde(default)]
    pub output_to_speaker: bool,
    /// Path of the decodable background asset.
    #[serde(default = "default_background_source")]
    pub background_audio_source: String,
    /// Nominal tick: the span of one ambience frame unless `idle_frame_ms`
    /// is set. Speech frames are paced by each chunk's own duration.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Span of one ambience-only frame. Defaults to the tick interval.
    #[serde(default)]
    pub idle_frame_ms: Option<u64>,
    /// Stop emitting ambience this long after the final chunk.
    /// Unset keeps the bed playing until new speech arrives.
    #[serde(default)]
    pub trailing_background_ms: Option<u64>,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_drain_wait_ms")]
    pub drain_wait_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Directory the speaker sink writes `<call-id>.pcm` into when
    /// `output_to_speaker` is set and no device is supplied.
    #[serde(default)]
    pub speaker_output_path: Option<String>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_size: default_chunk_size(),
            background_volume: default_background_volume(),
            output_to_speaker: false,
            background_audio_source: default_background_source(),
            tick_interval_ms: default_tick_interval_ms(),
            idle_frame_ms: None,
            trailing_background_ms: None,
            idle_poll_ms: default_idle_poll_ms(),
            drain_wait_ms: default_drain_wait_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            speaker_output_path: None,
        }
    }
}

impl MixerConfig {
    pub fn validate(&self) -> MixerResult<()> {
        if !(0.0..=1.0).contains(&self.background_volume) {
            return Err(MixerError::InvalidConfig(format!(
                "background_volume must be within [0, 1], got {}",
                self.background_volume
            )));
        }
        if self.sample_rate == 0 {
            return Err(MixerError::InvalidConfig("sample_rate must be non-zero".into()));
        }
        if self.chunk_size == 0 || self.chunk_size % 2 != 0 {
            return Err(MixerError::InvalidConfig(format!(
                "chunk_size must be a positive whole number of samples, got {} bytes",
                self.chunk_size
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(MixerError::InvalidConfig(
                "tick_interval_ms must be non-zero".into(),
            ));
        }
        if self.idle_frame_ms == Some(0) {
            return Err(MixerError::InvalidConfig("idle_frame_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn format(&self) -> PcmFormat {
        PcmFormat::mono(self.sample_rate)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Samples in one ambience-only frame.
    pub fn idle_frame_samples(&self) -> usize {
        let ms = self.idle_frame_ms.unwrap_or(self.tick_interval_ms);
        self.format().samples_for_ms(ms).max(1)
    }

    /// Cap on ambience samples emitted after a final chunk, if any.
    pub fn trailing_limit_samples(&self) -> Option<usize> {
        self.trailing_background_ms
            .map(|ms| self.format().samples_for_ms(ms))
    }
}

fn default_sample_rate() -> u32 {
    TELEPHONY_SAMPLE_RATE
}

fn default_chunk_size() -> usize {
    TELEPHONY_CHUNK_SIZE
}

fn default_background_volume() -> f32 {
    DEFAULT_BACKGROUND_VOLUME
}

fn default_background_source() -> String {
    "assets/ambience.wav".to_string()
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_idle_poll_ms() -> u64 {
    DEFAULT_IDLE_POLL_MS
}

fn default_drain_wait_ms() -> u64 {
    DEFAULT_DRAIN_WAIT_MS
}

fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}
