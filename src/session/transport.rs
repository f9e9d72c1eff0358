//! Duplex streaming session to the remote speech model
//!
//! One WebSocket carries outbound PCM chunks and inbound audio,
//! interruption, and lifecycle events. `connect` is a two-outcome
//! operation: a ready transport after the remote handshake ack, or a
//! typed failure — never a pending handle whose failure can be lost.
//! Reader and writer run as independent tasks over the split socket so
//! neither direction blocks the other.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::audio::EncodedChunk;
use crate::auth::Credential;
use crate::config::{ModelConfig, PersonaConfig};
use crate::{Error, Result};

/// Outbound channel depth in chunks; sends beyond it are dropped
const OUTBOUND_DEPTH: usize = 32;

/// Inbound event channel depth
const EVENT_DEPTH: usize = 64;

/// Connection lifecycle state, the sole authority for pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session open
    #[default]
    Disconnected,
    /// Handshake in flight
    Connecting,
    /// Handshake acknowledged, session live
    Connected,
    /// Session ended on a fault
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Inbound messages delivered by the transport
#[derive(Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// Audio payload (decoded from base64, still PCM bytes)
    Audio(Vec<u8>),
    /// The model was interrupted; queued response audio is stale
    Interrupted,
    /// Remote closed the session gracefully
    Closed,
    /// Transport fault
    Error(String),
}

/// An open duplex session
pub struct LiveTransport {
    outbound: mpsc::Sender<EncodedChunk>,
    events: mpsc::Receiver<ServerEvent>,
    close: Option<oneshot::Sender<()>>,
}

impl LiveTransport {
    /// Open a session and complete the remote handshake
    ///
    /// Sends the setup message ({model, AUDIO modality, voice, system
    /// instruction}) and waits for the explicit `setupComplete` ack
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the socket cannot be opened or the
    /// handshake is refused.
    pub async fn connect(
        model: &ModelConfig,
        persona: &PersonaConfig,
        credential: &Credential,
    ) -> Result<Self> {
        let mut url = url::Url::parse(&model.endpoint)
            .map_err(|e| Error::Transport(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair(credential.query_param(), credential.expose());

        tracing::debug!(model = %model.id, "opening duplex session");

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;
        let (mut writer, mut reader) = ws.split();

        let setup = serde_json::to_string(&SetupMessage::new(model, persona))?;
        writer
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| Error::Transport(format!("setup send failed: {e}")))?;

        // connecting -> connected only on the explicit handshake ack
        await_setup_ack(&mut reader).await?;
        tracing::info!(model = %model.id, "session connected");

        let (out_tx, mut out_rx) = mpsc::channel::<EncodedChunk>(OUTBOUND_DEPTH);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_DEPTH);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        // Writer task: outbound chunks until closed
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = out_rx.recv() => {
                        let Some(chunk) = chunk else { break };
                        let Ok(text) = serde_json::to_string(&RealtimeInputMessage::new(&chunk))
                        else {
                            continue;
                        };
                        if writer.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = &mut close_rx => {
                        let _ = writer.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Reader task: inbound events until the socket ends
        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        for event in parse_server_message(text.as_ref()) {
                            if event_tx.send(event).await.is_err() {
                                return; // session torn down
                            }
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        // Some servers deliver the same JSON as binary frames
                        if let Ok(text) = std::str::from_utf8(&bytes) {
                            for event in parse_server_message(text) {
                                if event_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = event_tx.send(ServerEvent::Closed).await;
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx.send(ServerEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = event_tx.send(ServerEvent::Closed).await;
        });

        Ok(Self {
            outbound: out_tx,
            events: event_rx,
            close: Some(close_tx),
        })
    }

    /// Send an encoded chunk, best effort
    ///
    /// Non-queuing by design: if the writer is saturated or the session
    /// is torn down the chunk is silently dropped — stale captured audio
    /// has no value once real time has passed.
    pub fn send(&self, chunk: EncodedChunk) {
        let _ = self.outbound.try_send(chunk);
    }

    /// Next inbound event; `None` after the reader has ended and the
    /// buffered events are drained
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Begin a graceful close; safe to call more than once
    pub fn begin_close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        self.begin_close();
    }
}

/// Wait for the `setupComplete` acknowledgment
async fn await_setup_ack<S>(reader: &mut S) -> Result<()>
where
    S: futures::Stream<
            Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(frame)) => {
                return Err(Error::Transport(format!(
                    "remote closed during handshake: {frame:?}"
                )));
            }
            Ok(_) => continue,
            Err(e) => return Err(Error::Transport(format!("handshake failed: {e}"))),
        };

        let parsed: ServerMessage = serde_json::from_str(&text)
            .map_err(|e| Error::Transport(format!("malformed handshake message: {e}")))?;
        if parsed.setup_complete.is_some() {
            return Ok(());
        }
    }

    Err(Error::Transport(
        "connection ended before handshake ack".to_string(),
    ))
}

/// Parse one server message into pipeline events
///
/// Audio parts are emitted before an interruption flag carried by the
/// same message, matching the order the payload describes. Malformed
/// messages and undecodable payloads are logged and skipped.
fn parse_server_message(text: &str) -> Vec<ServerEvent> {
    let parsed: ServerMessage = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable server message dropped");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if let Some(content) = parsed.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(blob) = part.inline_data else { continue };
                match BASE64.decode(blob.data.as_bytes()) {
                    Ok(bytes) => events.push(ServerEvent::Audio(bytes)),
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable audio payload dropped");
                    }
                }
            }
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
    }
    events
}

// --- Wire format ---

#[derive(Serialize)]
struct SetupMessage {
    setup: Setup,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
    text: String,
}

impl SetupMessage {
    fn new(model: &ModelConfig, persona: &PersonaConfig) -> Self {
        let system_instruction = if persona.instruction.is_empty() {
            None
        } else {
            Some(Content {
                parts: vec![TextPart {
                    text: persona.instruction.clone(),
                }],
            })
        };

        Self {
            setup: Setup {
                model: model.id.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: persona.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
struct RealtimeInput {
    audio: AudioBlob,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioBlob {
    data: String,
    mime_type: String,
}

impl RealtimeInputMessage {
    fn new(chunk: &EncodedChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: AudioBlob {
                    data: BASE64.encode(&chunk.data),
                    mime_type: chunk.mime_type.clone(),
                },
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    interrupted: bool,
    model_turn: Option<ModelTurn>,
}

#[derive(Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model() -> ModelConfig {
        ModelConfig {
            id: "models/test-audio".to_string(),
            endpoint: "wss://example.invalid/ws".to_string(),
        }
    }

    fn test_persona() -> PersonaConfig {
        PersonaConfig {
            voice: "Zephyr".to_string(),
            instruction: "Repeat what the user says.".to_string(),
        }
    }

    #[test]
    fn setup_message_shape() {
        let message = SetupMessage::new(&test_model(), &test_persona());
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["setup"]["model"], "models/test-audio");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Repeat what the user says."
        );
    }

    #[test]
    fn empty_instruction_omits_system_instruction() {
        let persona = PersonaConfig {
            voice: "Zephyr".to_string(),
            instruction: String::new(),
        };
        let json = serde_json::to_value(SetupMessage::new(&test_model(), &persona)).unwrap();
        assert!(json["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn realtime_input_carries_base64_and_mime() {
        let chunk = EncodedChunk {
            data: vec![0x01, 0x02, 0x03],
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        let json = serde_json::to_value(RealtimeInputMessage::new(&chunk)).unwrap();

        assert_eq!(json["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(
            json["realtimeInput"]["audio"]["data"],
            BASE64.encode([0x01, 0x02, 0x03])
        );
    }

    #[test]
    fn parse_audio_payload() {
        let data = BASE64.encode([0x10u8, 0x20, 0x30, 0x40]);
        let text = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{data}","mimeType":"audio/pcm;rate=24000"}}}}]}}}}}}"#
        );

        let events = parse_server_message(&text);
        assert_eq!(events, vec![ServerEvent::Audio(vec![0x10, 0x20, 0x30, 0x40])]);
    }

    #[test]
    fn parse_interruption() {
        let events = parse_server_message(r#"{"serverContent":{"interrupted":true}}"#);
        assert_eq!(events, vec![ServerEvent::Interrupted]);
    }

    #[test]
    fn audio_precedes_interruption_in_same_message() {
        let data = BASE64.encode([0u8, 0]);
        let text = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{data}"}}}}]}},"interrupted":true}}}}"#
        );

        let events = parse_server_message(&text);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::Audio(_)));
        assert_eq!(events[1], ServerEvent::Interrupted);
    }

    #[test]
    fn setup_complete_produces_no_pipeline_events() {
        let events = parse_server_message(r#"{"setupComplete":{}}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_message_is_dropped() {
        assert!(parse_server_message("not json").is_empty());
        assert!(parse_server_message(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"!!!not-base64!!!"}}]}}}"#).is_empty());
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }
}
