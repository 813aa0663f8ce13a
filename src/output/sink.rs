use async_trait::async_trait;
use bytes::Bytes;

use crate::common::errors::TransportError;

/// Ordered, stream-oriented transport (e.g. the telephony socket).
///
/// `send` must not return before the bytes are handed to the transport, so
/// the fan-out can guarantee ordering by awaiting each call.
#[async_trait]
pub trait NetworkSink: Send {
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    fn name(&self) -> &str {
        "network"
    }
}

/// Local playback device. Must return immediately.
pub trait SpeakerSink: Send {
    fn consume_nonblocking(&self, chunk: Bytes);

    /// Release the device. Called once when the engine stops.
    fn close(&mut self) {}
}
