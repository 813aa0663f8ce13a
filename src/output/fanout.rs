//! Splits each mixed frame into transport-sized sub-chunks and delivers them
//! to the active sinks.
//!
//! The network sink is awaited sub-chunk by sub-chunk so byte order holds
//! within and across frames. Its first failure (or a send that exceeds the
//! timeout) disables it for the rest of the call; mixing and the speaker
//! carry on.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::sink::{NetworkSink, SpeakerSink};
use crate::{
    audio::mix::MixedFrame,
    common::errors::TransportError,
};

/// What happened to one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub sub_chunks: usize,
    pub network_bytes: usize,
    /// The network sink failed during this frame and is now disabled.
    pub network_failed: bool,
}

pub struct OutputFanout {
    chunk_size: usize,
    send_timeout: Option<Duration>,
    network: Option<Box<dyn NetworkSink>>,
    speaker: Option<Box<dyn SpeakerSink>>,
}

impl OutputFanout {
    /// `send_timeout` of zero disables the per-send bound.
    pub fn new(chunk_size: usize, send_timeout: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            send_timeout: (!send_timeout.is_zero()).then_some(send_timeout),
            network: None,
            speaker: None,
        }
    }

    pub fn with_network(mut self, sink: Box<dyn NetworkSink>) -> Self {
        self.network = Some(sink);
        self
    }

    pub fn with_speaker(mut self, sink: Box<dyn SpeakerSink>) -> Self {
        self.speaker = Some(sink);
        self
    }

    pub fn network_active(&self) -> bool {
        self.network.is_some()
    }

    pub fn speaker_active(&self) -> bool {
        self.speaker.is_some()
    }

    pub async fn dispatch(&mut self, frame: &MixedFrame) -> Delivery {
        let mut delivery = Delivery::default();
        let len = frame.pcm.len();
        let mut offset = 0;

        while offset < len {
            let end = (offset + self.chunk_size).min(len);
            let sub = frame.pcm.slice(offset..end);
            offset = end;
            delivery.sub_chunks += 1;

            if let Some(speaker) = &self.speaker {
                speaker.consume_nonblocking(sub.clone());
            }

            if self.network.is_some() {
                let sub_len = sub.len();
                match self.send_network(sub).await {
                    Ok(()) => delivery.network_bytes += sub_len,
                    Err(e) => {
                        let name = self
                            .network
                            .take()
                            .map(|s| s.name().to_string())
                            .unwrap_or_default();
                        warn!("Disabling {} sink for this call: {}", name, e);
                        delivery.network_failed = true;
                    }
                }
            }
        }

        delivery
    }

    async fn send_network(&mut self, sub: Bytes) -> Result<(), TransportError> {
        let Some(sink) = self.network.as_mut() else {
            return Err(TransportError::Closed);
        };
        match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, sink.send(sub))
                .await
                .map_err(|_| TransportError::Timeout(limit.as_millis() as u64))?,
            None => sink.send(sub).await,
        }
    }

    /// Drop the network sink and release the speaker.
    pub fn close(&mut self) {
        self.network = None;
        if let Some(mut speaker) = self.speaker.take() {
            speaker.close();
            debug!("Speaker sink closed");
        }
    }
}
