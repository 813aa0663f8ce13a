//! Speaker sinks backed by a channel to a device thread.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    thread::JoinHandle,
};

use bytes::Bytes;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, error, trace};

use super::sink::SpeakerSink;
use crate::{
    audio::constants::SPEAKER_QUEUE_CAPACITY,
    common::errors::{MixerError, MixerResult},
};

/// Forwards sub-chunks to whoever holds the receiver. Drops chunks when the
/// consumer falls `capacity` chunks behind rather than blocking the mixer.
pub struct ChannelSpeaker {
    tx: Option<Sender<Bytes>>,
}

impl ChannelSpeaker {
    pub fn new(capacity: usize) -> (Self, Receiver<Bytes>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx: Some(tx) }, rx)
    }
}

impl SpeakerSink for ChannelSpeaker {
    fn consume_nonblocking(&self, chunk: Bytes) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Speaker queue full, dropping sub-chunk"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Writes raw PCM to a file from a dedicated thread.
pub struct FileSpeaker {
    inner: ChannelSpeaker,
    worker: Option<JoinHandle<()>>,
}

impl FileSpeaker {
    pub fn spawn(path: impl Into<PathBuf>) -> MixerResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| {
            MixerError::InvalidConfig(format!("cannot open speaker output {}: {}", path.display(), e))
        })?;
        let (inner, rx) = ChannelSpeaker::new(SPEAKER_QUEUE_CAPACITY);

        let worker = std::thread::Builder::new()
            .name("speaker".into())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                for chunk in rx.iter() {
                    if let Err(e) = out.write_all(&chunk) {
                        error!("Speaker write failed: {}", e);
                        return;
                    }
                }
                if let Err(e) = out.flush() {
                    error!("Speaker flush failed: {}", e);
                }
                debug!("Speaker thread finished");
            })
            .map_err(|e| MixerError::InvalidConfig(format!("cannot start speaker thread: {e}")))?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }
}

impl SpeakerSink for FileSpeaker {
    fn consume_nonblocking(&self, chunk: Bytes) {
        self.inner.consume_nonblocking(chunk);
    }

    fn close(&mut self) {
        self.inner.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for FileSpeaker {
    fn drop(&mut self) {
        self.close();
    }
}
