use crate::capture::CaptureConfig;
use crate::types::{
    AudioTranscriptionConfig, Content, ContextWindowCompression, GenerationConfig,
    PrebuiltVoiceConfig, ResponseModality, SessionResumptionConfig, Setup, SlidingWindow,
    SpeechConfig, Tool, VoiceConfig,
};
use live_core::FunctionDeclaration;
use secrecy::SecretString;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Zephyr";

/// When the remote should start dropping old context, and how far down.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompressionPolicy {
    pub trigger_tokens: Option<u64>,
    pub target_tokens: Option<u64>,
}

/// Everything needed to open a live session.
#[derive(Debug)]
pub struct LiveConfig {
    pub api_key: SecretString,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    pub compression: CompressionPolicy,
    pub capture: CaptureConfig,
}

impl LiveConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: None,
            compression: CompressionPolicy::default(),
            capture: CaptureConfig::default(),
        }
    }

    /// Builds the setup payload sent when a channel opens.
    pub fn setup(&self, tools: Vec<FunctionDeclaration>, resumption_handle: Option<String>) -> Setup {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: self
                .system_instruction
                .as_ref()
                .map(|text| Content::text(None, text.clone())),
            tools: if tools.is_empty() {
                Vec::new()
            } else {
                vec![Tool {
                    function_declarations: tools,
                }]
            },
            input_audio_transcription: AudioTranscriptionConfig::default(),
            output_audio_transcription: AudioTranscriptionConfig::default(),
            context_window_compression: ContextWindowCompression {
                trigger_tokens: self.compression.trigger_tokens,
                sliding_window: SlidingWindow {
                    target_tokens: self.compression.target_tokens,
                },
            },
            session_resumption: SessionResumptionConfig {
                handle: resumption_handle,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientMessage;
    use serde_json::json;

    #[test]
    fn test_setup_wire_shape() {
        let mut config = LiveConfig::new(SecretString::from("k".to_string()));
        config.model = "gemini-live".into();
        config.voice = "Puck".into();
        config.compression.trigger_tokens = Some(25_000);
        let tools = vec![FunctionDeclaration::new(
            "list_documents",
            "List documents",
            json!({"type": "object"}),
        )];

        let value =
            serde_json::to_value(ClientMessage::Setup(config.setup(tools, None))).unwrap();
        assert_eq!(
            value,
            json!({"setup": {
                "model": "models/gemini-live",
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {"voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Puck"}}}
                },
                "tools": [{"functionDeclarations": [
                    {"name": "list_documents", "description": "List documents", "parameters": {"type": "object"}}
                ]}],
                "inputAudioTranscription": {},
                "outputAudioTranscription": {},
                "contextWindowCompression": {"triggerTokens": 25000, "slidingWindow": {}},
                "sessionResumption": {"handle": null}
            }})
        );
    }

    #[test]
    fn test_setup_carries_resumption_handle_and_instruction() {
        let mut config = LiveConfig::new(SecretString::from("k".to_string()));
        config.system_instruction = Some("Be brief.".into());
        let setup = config.setup(vec![], Some("abc".into()));
        let value = serde_json::to_value(&setup).unwrap();
        assert_eq!(value["sessionResumption"]["handle"], "abc");
        assert_eq!(value["systemInstruction"], json!({"parts": [{"text": "Be brief."}]}));
        assert!(value.get("tools").is_none());
    }
}
