//! Wire types for the `BidiGenerateContent` WebSocket protocol.
//!
//! Outbound messages are fully typed. Inbound messages are deserialized
//! leniently (every field optional) and then normalized by [`crate::inbound`].

use live_core::{FunctionDeclaration, ToolCallResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Outbound ---

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    pub input_audio_transcription: AudioTranscriptionConfig,
    pub output_audio_transcription: AudioTranscriptionConfig,
    pub context_window_compression: ContextWindowCompression,
    pub session_resumption: SessionResumptionConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Serializes as `{}`: presence alone enables transcription.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextWindowCompression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_tokens: Option<u64>,
    pub sliding_window: SlidingWindow,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlidingWindow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_tokens: Option<u64>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SessionResumptionConfig {
    /// `null` asks for a fresh session; a token restores a previous one.
    pub handle: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<TextPart>,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TextPart {
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResult,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionResult {
    pub result: Value,
}

impl From<ToolCallResponse> for FunctionResponse {
    fn from(r: ToolCallResponse) -> Self {
        Self {
            id: r.id,
            name: r.name,
            response: FunctionResult { result: r.result },
        }
    }
}

// --- Inbound ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallPayload>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ServerContentTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<Blob>,
    pub function_call: Option<FunctionCall>,
}

#[derive(Deserialize, Debug)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

/// Tool calls arrive either wrapped (`{"functionCalls": [...]}`) or as a bare array.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum ToolCallPayload {
    Wrapped {
        #[serde(rename = "functionCalls", default)]
        function_calls: Vec<FunctionCall>,
    },
    Bare(Vec<FunctionCall>),
}

#[derive(Deserialize, Debug, Clone)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize, Debug)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: Option<bool>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_response_wire_shape() {
        let msg = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![
                ToolCallResponse {
                    id: "c1".into(),
                    name: "list_documents".into(),
                    result: json!("ok"),
                }
                .into(),
            ],
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"toolResponse": {"functionResponses": [
                {"id": "c1", "name": "list_documents", "response": {"result": "ok"}}
            ]}})
        );
    }

    #[test]
    fn test_realtime_input_wire_shape() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: "audio/pcm;rate=16000".into(),
                data: "AAA=".into(),
            },
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"realtimeInput": {"audio": {"mimeType": "audio/pcm;rate=16000", "data": "AAA="}}})
        );
    }

    #[test]
    fn test_client_content_wire_shape() {
        let msg = ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), "hi")],
            turn_complete: true,
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"clientContent": {"turns": [{"role": "user", "parts": [{"text": "hi"}]}], "turnComplete": true}})
        );
    }

    #[test]
    fn test_tool_call_payload_accepts_both_shapes() {
        let wrapped: ToolCallPayload =
            serde_json::from_value(json!({"functionCalls": [{"id": "1", "name": "a"}]})).unwrap();
        assert!(matches!(wrapped, ToolCallPayload::Wrapped { function_calls } if function_calls.len() == 1));

        let bare: ToolCallPayload =
            serde_json::from_value(json!([{"name": "a", "args": {"x": 1}}])).unwrap();
        assert!(matches!(bare, ToolCallPayload::Bare(calls) if calls[0].args == json!({"x": 1})));
    }
}
