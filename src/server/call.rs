//! `GET /call`: upgrade to a WebSocket and run one mixer engine for it.
//!
//! Inbound frames carry synthesized speech; the mixed stream goes back out
//! as binary messages of at most `chunk_size` bytes.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::AppState;
use crate::{
    common::{
        errors::{MixerError, MixerResult, TransportError},
        types::CallId,
    },
    engine::MixerEngine,
    output::NetworkSink,
};

/// Outbound messages buffered between the mix loop and the socket.
const OUTBOUND_QUEUE: usize = 64;

/// JSON control messages accepted on the call socket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Base64 PCM in the configured format.
    Speak {
        audio: String,
        #[serde(default, rename = "final")]
        is_final: bool,
    },
    /// End of utterance with no further audio.
    End,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Ready {
        call_id: CallId,
        sample_rate: u32,
        chunk_size: usize,
    },
}

/// What one socket message asks the engine to do.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Audio { pcm: Bytes, is_final: bool },
    Hangup,
    Ignore,
}

pub fn decode_message(msg: Message) -> Result<Inbound, String> {
    match msg {
        Message::Binary(data) => Ok(Inbound::Audio {
            pcm: data,
            is_final: false,
        }),
        Message::Text(text) => {
            let parsed: ClientMessage = serde_json::from_str(text.as_str())
                .map_err(|e| format!("invalid message: {}", e))?;
            match parsed {
                ClientMessage::Speak { audio, is_final } => {
                    let pcm = STANDARD
                        .decode(audio.as_bytes())
                        .map_err(|e| format!("invalid base64 audio: {}", e))?;
                    Ok(Inbound::Audio {
                        pcm: Bytes::from(pcm),
                        is_final,
                    })
                }
                ClientMessage::End => Ok(Inbound::Audio {
                    pcm: Bytes::new(),
                    is_final: true,
                }),
            }
        }
        Message::Close(_) => Ok(Inbound::Hangup),
        _ => Ok(Inbound::Ignore),
    }
}

/// Network sink that queues binary messages for the socket task.
pub struct WebSocketSink {
    tx: flume::Sender<Message>,
}

impl WebSocketSink {
    pub fn new(tx: flume::Sender<Message>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NetworkSink for WebSocketSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        self.tx
            .send_async(Message::Binary(chunk))
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

pub async fn call_handler(
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<Response, (StatusCode, &'static str)> {
    if let Some(password) = &state.config.server.password {
        let auth_header = headers.get("authorization").and_then(|h| h.to_str().ok());
        match auth_header {
            Some(auth) if auth == password => {}
            Some(_) => {
                warn!("Authorization failed: Invalid password provided");
                return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
            }
            None => {
                warn!("Authorization failed: Missing Authorization header");
                return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
            }
        }
    }

    let call_id = headers
        .get("call-id")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| CallId::from(s.to_string()))
        .unwrap_or_else(CallId::generate);

    // The id is reserved before upgrading so two sockets can never share it.
    let (tx, rx) = flume::bounded(OUTBOUND_QUEUE);
    let engine = match state.register_call(call_id, |id| build_engine(&state, id, tx)) {
        Ok(Some(engine)) => engine,
        Ok(None) => return Err((StatusCode::CONFLICT, "Call already active")),
        Err(e) => {
            error!("Failed to set up call: {}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to set up call"));
        }
    };

    let failed_state = state.clone();
    let failed_engine = engine.clone();
    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!("WebSocket upgrade failed: call={} err={}", failed_engine.call_id(), e);
            failed_state.deregister_call(&failed_engine);
        })
        .on_upgrade(move |socket| handle_socket(socket, state, engine, rx))
        .into_response())
}

fn build_engine(
    state: &AppState,
    call_id: CallId,
    tx: flume::Sender<Message>,
) -> MixerResult<MixerEngine> {
    MixerEngine::builder(state.config.mixer.clone(), state.new_track()?)
        .call_id(call_id)
        .network(WebSocketSink::new(tx))
        .build()
}

pub async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    engine: Arc<MixerEngine>,
    rx: flume::Receiver<Message>,
) {
    let call_id = engine.call_id().clone();
    if let Err(e) = engine.start() {
        error!("Failed to start call {}: {}", call_id, e);
        state.deregister_call(&engine);
        engine.stop().await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    info!("Call connected: {}", call_id);

    let ready = ServerMessage::Ready {
        call_id: call_id.clone(),
        sample_rate: state.config.mixer.sample_rate,
        chunk_size: state.config.mixer.chunk_size,
    };
    if let Ok(json) = serde_json::to_string(&ready) {
        let _ = socket.send(Message::Text(json.into())).await;
    }

    loop {
        tokio::select! {
            Ok(msg) = rx.recv_async() => {
                if let Err(e) = socket.send(msg).await {
                    warn!("Socket send error: call={} err={}", call_id, e);
                    break;
                }
            }
            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket error: call={} err={}", call_id, e);
                        break;
                    }
                    None => break,
                };

                match decode_message(msg) {
                    Ok(Inbound::Audio { pcm, is_final }) => match engine.push(pcm, is_final) {
                        Ok(()) | Err(MixerError::FormatMismatch(_)) => {}
                        Err(e) => {
                            warn!("Call {} no longer accepts audio: {}", call_id, e);
                            break;
                        }
                    },
                    Ok(Inbound::Hangup) => break,
                    Ok(Inbound::Ignore) => {}
                    Err(e) => warn!("Call {}: {}", call_id, e),
                }
            }
        }
    }

    state.deregister_call(&engine);
    engine.stop().await;
    info!("Call closed: {} {:?}", call_id, engine.stats());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_are_non_final_audio() {
        let inbound = decode_message(Message::Binary(Bytes::from_static(&[1, 0, 2, 0]))).unwrap();
        assert_eq!(
            inbound,
            Inbound::Audio {
                pcm: Bytes::from_static(&[1, 0, 2, 0]),
                is_final: false
            }
        );
    }

    #[test]
    fn speak_message_carries_base64_pcm() {
        let audio = STANDARD.encode([0x10u8, 0x00, 0xff, 0x7f]);
        let text = format!(r#"{{"op":"speak","audio":"{}","final":true}}"#, audio);
        let inbound = decode_message(Message::Text(text.into())).unwrap();
        assert_eq!(
            inbound,
            Inbound::Audio {
                pcm: Bytes::from_static(&[0x10, 0x00, 0xff, 0x7f]),
                is_final: true
            }
        );
    }

    #[test]
    fn speak_defaults_to_non_final() {
        let msg: ClientMessage = serde_json::from_str(r#"{"op":"speak","audio":""}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Speak {
                audio: String::new(),
                is_final: false
            }
        );
    }

    #[test]
    fn end_is_an_empty_final_chunk() {
        let inbound = decode_message(Message::Text(r#"{"op":"end"}"#.into())).unwrap();
        assert_eq!(
            inbound,
            Inbound::Audio {
                pcm: Bytes::new(),
                is_final: true
            }
        );
    }

    #[test]
    fn malformed_messages_are_reported() {
        assert!(decode_message(Message::Text(r#"{"op":"dance"}"#.into())).is_err());
        assert!(
            decode_message(Message::Text(r#"{"op":"speak","audio":"%%%"}"#.into())).is_err()
        );
        assert_eq!(decode_message(Message::Close(None)).unwrap(), Inbound::Hangup);
        assert_eq!(
            decode_message(Message::Ping(Bytes::new())).unwrap(),
            Inbound::Ignore
        );
    }

    #[test]
    fn ready_message_shape() {
        let json = serde_json::to_value(ServerMessage::Ready {
            call_id: CallId::from("abc".to_string()),
            sample_rate: 16_000,
            chunk_size: 640,
        })
        .unwrap();
        assert_eq!(json["op"], "ready");
        assert_eq!(json["callId"], "abc");
        assert_eq!(json["chunkSize"], 640);
    }

    #[tokio::test]
    async fn socket_sink_reports_closed_transport() {
        let (tx, rx) = flume::bounded(4);
        let mut sink = WebSocketSink::new(tx);
        sink.send(Bytes::from_static(&[1, 2])).await.unwrap();
        assert!(matches!(rx.recv_async().await, Ok(Message::Binary(_))));

        drop(rx);
        assert!(matches!(
            sink.send(Bytes::from_static(&[3, 4])).await,
            Err(TransportError::Closed)
        ));
    }
}
