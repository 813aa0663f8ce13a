//! Foreground intake: the non-blocking push side and the single consumer
//! that moves queued speech into the mixer's pending list.
//!
//! The flume channel is the one serialization point between producers, so
//! chunks reach the mixer in exactly the order they were pushed.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::{
    audio::pcm,
    common::{
        errors::{MixerError, MixerResult},
        types::PcmFormat,
    },
};

/// One piece of synthesized speech. `is_final` marks end of utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundChunk {
    pub pcm: Bytes,
    pub is_final: bool,
}

impl ForegroundChunk {
    pub fn new(pcm: impl Into<Bytes>, is_final: bool) -> Self {
        Self {
            pcm: pcm.into(),
            is_final,
        }
    }

    pub fn samples(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Ordered chunks waiting to be mixed. Appended by the drain task, popped by
/// the mix tick.
#[derive(Debug, Clone, Default)]
pub struct PendingChunks {
    inner: Arc<Mutex<VecDeque<ForegroundChunk>>>,
}

impl PendingChunks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, chunk: ForegroundChunk) {
        self.inner.lock().push_back(chunk);
    }

    pub fn pop_front(&self) -> Option<ForegroundChunk> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut guard = self.inner.lock();
        let n = guard.len();
        guard.clear();
        n
    }
}

/// Create the producer handle and the consumer end for one engine.
pub fn intake_channel(format: PcmFormat) -> (ForegroundIntake, IntakeReceiver) {
    let (tx, rx) = flume::unbounded();
    (
        ForegroundIntake {
            tx,
            format,
            closed: Arc::new(AtomicBool::new(false)),
        },
        IntakeReceiver { rx },
    )
}

/// Cloneable, non-blocking producer handle.
#[derive(Debug, Clone)]
pub struct ForegroundIntake {
    tx: Sender<ForegroundChunk>,
    format: PcmFormat,
    closed: Arc<AtomicBool>,
}

impl ForegroundIntake {
    /// Queue raw little-endian i16 PCM in the configured format.
    ///
    /// Never blocks. Fails with `FormatMismatch` for a torn sample and with
    /// `Stopped` once the engine has shut down.
    pub fn push(&self, chunk: impl Into<Bytes>, is_final: bool) -> MixerResult<()> {
        let chunk = ForegroundChunk::new(chunk, is_final);
        if let Err(e) = pcm::sample_count(&chunk.pcm) {
            warn!("Dropping foreground chunk: {}", e);
            return Err(e);
        }
        self.send(chunk)
    }

    /// Like [`push`](Self::push) but also checks the producer's declared
    /// format against the engine's.
    pub fn push_with_format(
        &self,
        chunk: impl Into<Bytes>,
        is_final: bool,
        format: PcmFormat,
    ) -> MixerResult<()> {
        if format != self.format {
            let e = MixerError::FormatMismatch(format!(
                "expected {}Hz/{}ch, got {}Hz/{}ch",
                self.format.sample_rate,
                self.format.channels,
                format.sample_rate,
                format.channels
            ));
            warn!("Dropping foreground chunk: {}", e);
            return Err(e);
        }
        self.push(chunk, is_final)
    }

    fn send(&self, chunk: ForegroundChunk) -> MixerResult<()> {
        if self.is_closed() {
            return Err(MixerError::Stopped);
        }
        trace!(
            "Queued foreground chunk: {} samples, final={}",
            chunk.samples(),
            chunk.is_final
        );
        self.tx.send(chunk).map_err(|_| MixerError::Stopped)
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Reject all further pushes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Result of one timed drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained(usize),
    TimedOut,
    /// Every producer handle is gone; nothing more can arrive.
    Disconnected,
}

/// The single consumer of the intake channel.
pub struct IntakeReceiver {
    rx: Receiver<ForegroundChunk>,
}

impl IntakeReceiver {
    /// Move everything currently queued into `pending`, in order, without
    /// waiting. Returns how many chunks moved.
    pub fn drain_into(&self, pending: &PendingChunks) -> usize {
        let mut guard = pending.inner.lock();
        let before = guard.len();
        guard.extend(self.rx.try_iter());
        guard.len() - before
    }

    /// Wait up to `wait` for the first chunk, then drain the rest.
    pub async fn wait_and_drain(&self, pending: &PendingChunks, wait: Duration) -> DrainOutcome {
        match tokio::time::timeout(wait, self.rx.recv_async()).await {
            Ok(Ok(first)) => {
                let mut guard = pending.inner.lock();
                guard.push_back(first);
                let before = guard.len();
                guard.extend(self.rx.try_iter());
                DrainOutcome::Drained(1 + guard.len() - before)
            }
            Ok(Err(_)) => DrainOutcome::Disconnected,
            Err(_) => DrainOutcome::TimedOut,
        }
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}
