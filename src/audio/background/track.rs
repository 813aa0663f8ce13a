//! A looping mono PCM bed with its own read cursor.
//!
//! The sample buffer is immutable and may be shared between call legs via
//! `Arc`; the cursor is per-track, so every engine owns an independent read
//! position.

use std::sync::Arc;

use tracing::debug;

use crate::common::errors::{MixerError, MixerResult};

/// Resource backing a decoded background asset.
///
/// Released by [`BackgroundTrack::close`] exactly once.
pub trait AssetHandle: Send {
    fn close(&mut self);
}

/// Handle for an asset that was decoded fully into memory; closing only
/// logs, the samples go away with the last `Arc`.
pub struct DecodedAsset {
    pub source_name: String,
}

impl AssetHandle for DecodedAsset {
    fn close(&mut self) {
        debug!("Released background asset {}", self.source_name);
    }
}

pub struct BackgroundTrack {
    samples: Arc<[i16]>,
    /// Always within `[0, samples.len())`.
    cursor: usize,
    handle: Option<Box<dyn AssetHandle>>,
}

impl BackgroundTrack {
    /// Wrap decoded samples. An empty buffer cannot loop and is rejected.
    pub fn new(samples: impl Into<Arc<[i16]>>) -> MixerResult<Self> {
        let samples = samples.into();
        if samples.is_empty() {
            return Err(MixerError::EmptyTrack);
        }
        Ok(Self {
            samples,
            cursor: 0,
            handle: None,
        })
    }

    pub fn with_handle(mut self, handle: Box<dyn AssetHandle>) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Shared view of the decoded samples.
    pub fn samples(&self) -> &Arc<[i16]> {
        &self.samples
    }

    /// Read exactly `n` samples, wrapping past the end as often as needed.
    pub fn read(&mut self, n: usize) -> Vec<i16> {
        let mut out = vec![0i16; n];
        self.read_into(&mut out);
        out
    }

    /// Fill `out` from the cursor and advance it by `out.len()` modulo the
    /// track length.
    pub fn read_into(&mut self, out: &mut [i16]) {
        let len = self.samples.len();
        let mut filled = 0;

        while filled < out.len() {
            let available = len - self.cursor;
            let n = available.min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.samples[self.cursor..self.cursor + n]);
            filled += n;
            self.cursor = (self.cursor + n) % len;
        }
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Release the asset handle. Returns `true` only on the call that
    /// actually released it.
    pub fn close(&mut self) -> bool {
        match self.handle.take() {
            Some(mut handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for BackgroundTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTrack")
            .field("len", &self.samples.len())
            .field("cursor", &self.cursor)
            .field("open", &self.handle.is_some())
            .finish()
    }
}
