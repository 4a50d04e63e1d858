//! Wire messages of the bidirectional live protocol and the demultiplexer
//! that turns an inbound frame into typed [`LiveEvent`]s.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::config::{LiveConfig, Modality};
use super::events::{LiveEvent, ResumptionUpdate, TranscriptFragment};

// ============================================================================
// Shared content types
// ============================================================================

/// Base64-encoded binary payload with its mime type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// One part of a turn: text or inline media
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.inline_data
            .as_ref()
            .is_some_and(|blob| blob.mime_type.starts_with("audio/"))
    }
}

/// A turn: a role plus its parts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

/// Kind of a realtime media frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
}

/// One realtime audio or video frame, raw bytes
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub kind: MediaKind,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl MediaChunk {
    /// 16-bit little-endian mono PCM at the given rate
    pub fn pcm(data: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: format!("audio/pcm;rate={}", sample_rate),
            data,
        }
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            kind: MediaKind::Image,
            mime_type: "image/jpeg".to_string(),
            data,
        }
    }

    pub fn to_blob(&self) -> Blob {
        Blob {
            mime_type: self.mime_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&self.data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

// ============================================================================
// Client -> server
// ============================================================================

/// Marker object that enables a server-side feature (`{}` on the wire)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enabled {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Resumption is always enabled; `handle` is absent for a fresh session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResumptionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Enabled>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Enabled>,
    #[serde(default)]
    pub session_resumption: SessionResumptionConfig,
}

impl Setup {
    /// Merge the negotiated config and an optional resumption token.
    pub fn new(model_id: &str, config: &LiveConfig, resumption_token: Option<String>) -> Self {
        let model = if model_id.starts_with("models/") {
            model_id.to_string()
        } else {
            format!("models/{}", model_id)
        };

        let speech_config = if config.voice_name.is_some() || config.language_code.is_some() {
            Some(SpeechConfig {
                language_code: config.language_code.clone(),
                voice_config: config.voice_name.clone().map(|voice_name| VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
                }),
            })
        } else {
            None
        };

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: config.response_modalities.clone(),
                speech_config,
            },
            system_instruction: config.system_instruction.clone().map(Content::system),
            input_audio_transcription: config.input_transcription.then(Enabled::default),
            output_audio_transcription: config.output_transcription.then(Enabled::default),
            session_resumption: SessionResumptionConfig {
                handle: resumption_token,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Message sent to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

// ============================================================================
// Server -> client
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub generation_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellationMessage {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Protobuf duration, e.g. "5s" or "0.5s"
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdateMessage {
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: bool,
}

/// Message received from the service. Exactly one field is normally set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallMessage>,
    pub tool_call_cancellation: Option<ToolCallCancellationMessage>,
    pub go_away: Option<GoAway>,
    pub session_resumption_update: Option<SessionResumptionUpdateMessage>,
    pub usage_metadata: Option<serde_json::Value>,
}

/// Parse a protobuf-JSON duration such as `"5s"` or `"1.500s"`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().trim_end_matches('s').parse().ok()?;
    // Negative, NaN and out-of-range values are rejected, not clamped
    Duration::try_from_secs_f64(secs).ok()
}

/// Classify one inbound frame into typed events.
///
/// Unrecognized shapes produce no events and are logged, never fatal.
pub fn demux(message: ServerMessage) -> Vec<LiveEvent> {
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(LiveEvent::SetupAcknowledged);
    }

    if let Some(content) = message.server_content {
        demux_server_content(content, &mut events);
    }

    if let Some(tool_call) = message.tool_call {
        events.push(LiveEvent::ToolCall(tool_call.function_calls));
    }

    if let Some(cancellation) = message.tool_call_cancellation {
        events.push(LiveEvent::ToolCallCancellation(cancellation.ids));
    }

    if let Some(update) = message.session_resumption_update {
        events.push(LiveEvent::SessionResumptionUpdate(ResumptionUpdate {
            resumable: update.resumable,
            new_handle: update.new_handle,
        }));
    }

    if let Some(go_away) = message.go_away {
        let time_left = go_away.time_left.as_deref().and_then(parse_duration);
        events.push(LiveEvent::ForcedTermination {
            reason: "server going away".to_string(),
            time_left,
        });
    }

    if let Some(usage) = message.usage_metadata {
        debug!("Usage metadata: {}", usage);
    } else if events.is_empty() {
        warn!("Ignoring unrecognized server message");
    }

    events
}

fn demux_server_content(content: ServerContent, events: &mut Vec<LiveEvent>) {
    if let Some(t) = content.input_transcription {
        events.push(LiveEvent::InputTranscriptFragment(TranscriptFragment {
            text: t.text,
            is_final: t.finished,
        }));
    }

    if let Some(t) = content.output_transcription {
        events.push(LiveEvent::OutputTranscriptFragment(TranscriptFragment {
            text: t.text,
            is_final: t.finished,
        }));
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if part.is_audio() {
                let Some(blob) = part.inline_data else { continue };
                match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                    Ok(data) => events.push(LiveEvent::Audio {
                        data,
                        mime_type: blob.mime_type,
                    }),
                    Err(e) => warn!("Dropping undecodable audio chunk: {}", e),
                }
            } else {
                events.push(LiveEvent::Content(part));
            }
        }
    }

    if content.interrupted {
        events.push(LiveEvent::Interrupted);
    }

    if content.generation_complete {
        debug!("Generation complete");
    }

    if content.turn_complete {
        events.push(LiveEvent::TurnComplete);
    }
}
