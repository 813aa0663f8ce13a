//! Central constants for the mixing pipeline.
//!
//! Defaults for the `[mixer]` config table live here so they stay consistent
//! between the config layer and the engine.

// ── Sample / PCM ─────────────────────────────────────────────────────────────

/// Telephony leg sample rate (Hz), mono linear16.
pub const TELEPHONY_SAMPLE_RATE: u32 = 16_000;

/// Transport sub-chunk size in bytes: 20 ms of 16 kHz mono linear16.
pub const TELEPHONY_CHUNK_SIZE: usize = 640;

/// Bytes per mono i16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

// ── i16 PCM clip boundaries ──────────────────────────────────────────────────

pub const INT16_MAX_F: f32 = 32_767.0;
pub const INT16_MIN_F: f32 = -32_768.0;

// ── Mixer pacing ─────────────────────────────────────────────────────────────

pub const DEFAULT_BACKGROUND_VOLUME: f32 = 0.4;

/// Nominal tick (ms): default span of one ambience-only frame.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Retry interval when a tick has nothing to emit (ms).
pub const DEFAULT_IDLE_POLL_MS: u64 = 10;

/// Upper bound the drain task waits on the intake channel per iteration (ms).
pub const DEFAULT_DRAIN_WAIT_MS: u64 = 50;

/// Upper bound for one network sub-chunk write (ms).
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1_000;

// ── Speaker ──────────────────────────────────────────────────────────────────

/// Sub-chunks buffered towards the speaker device thread before it drops.
pub const SPEAKER_QUEUE_CAPACITY: usize = 512;
