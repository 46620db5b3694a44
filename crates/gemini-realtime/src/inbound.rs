//! Normalization of inbound server messages into canonical events.
//!
//! A single server message may carry several things at once (a transcript
//! delta, an audio chunk and a turn-complete flag, say). [`normalize`] is the
//! only place that understands the message shapes; everything downstream
//! matches on [`InboundEvent`].

use crate::types::{FunctionCall, ServerMessage, ToolCallPayload};
use live_core::{SpeakerRole, ToolCallRequest, TranscriptFragment};
use tracing::debug;

/// An encoded audio chunk from the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudio {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SetupComplete,
    ResumptionUpdate { handle: String },
    Interrupted,
    Transcript(TranscriptFragment),
    Audio(InboundAudio),
    ModelText(String),
    ToolCalls(Vec<ToolCallRequest>),
    ToolCallsCancelled(Vec<String>),
    TurnComplete,
    GoAway { time_left: Option<String> },
}

/// Parses one text frame and normalizes it.
pub fn parse(text: &str) -> serde_json::Result<Vec<InboundEvent>> {
    serde_json::from_str::<ServerMessage>(text).map(normalize)
}

/// Flattens a server message into events, in the order they must be applied.
///
/// Resumption updates come first so a handle is never lost to a later
/// failure; interruption precedes audio so a flush cannot discard audio that
/// belongs to the next turn; turn completion comes last.
pub fn normalize(msg: ServerMessage) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    if let Some(update) = msg.session_resumption_update {
        match update.new_handle {
            Some(handle) if !handle.is_empty() && update.resumable != Some(false) => {
                events.push(InboundEvent::ResumptionUpdate { handle });
            }
            _ => debug!("Ignoring non-resumable session resumption update"),
        }
    }
    if msg.setup_complete.is_some() {
        events.push(InboundEvent::SetupComplete);
    }

    let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
    let mut turn_complete = false;

    if let Some(content) = msg.server_content {
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
            events.push(InboundEvent::Transcript(TranscriptFragment::partial(
                SpeakerRole::User,
                t.text,
            )));
        }
        if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
            events.push(InboundEvent::Transcript(TranscriptFragment::partial(
                SpeakerRole::Agent,
                t.text,
            )));
        }
        for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
            if let Some(blob) = part.inline_data {
                events.push(InboundEvent::Audio(InboundAudio {
                    data: blob.data,
                    mime_type: blob.mime_type,
                }));
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(InboundEvent::ModelText(text));
            }
            if let Some(call) = part.function_call {
                tool_calls.push(to_request(call));
            }
        }
        turn_complete = content.turn_complete;
    }

    if let Some(payload) = msg.tool_call {
        let calls = match payload {
            ToolCallPayload::Wrapped { function_calls } => function_calls,
            ToolCallPayload::Bare(calls) => calls,
        };
        tool_calls.extend(calls.into_iter().map(to_request));
    }
    if !tool_calls.is_empty() {
        events.push(InboundEvent::ToolCalls(tool_calls));
    }
    if let Some(cancel) = msg.tool_call_cancellation {
        events.push(InboundEvent::ToolCallsCancelled(cancel.ids));
    }
    if let Some(go_away) = msg.go_away {
        events.push(InboundEvent::GoAway {
            time_left: go_away.time_left,
        });
    }
    if turn_complete {
        events.push(InboundEvent::TurnComplete);
    }
    events
}

fn to_request(call: FunctionCall) -> ToolCallRequest {
    ToolCallRequest {
        id: call.id.unwrap_or_default(),
        name: call.name,
        args: call.args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events(value: serde_json::Value) -> Vec<InboundEvent> {
        parse(&value.to_string()).unwrap()
    }

    #[test]
    fn test_resumption_update() {
        assert_eq!(
            events(json!({"sessionResumptionUpdate": {"resumable": true, "newHandle": "abc"}})),
            vec![InboundEvent::ResumptionUpdate {
                handle: "abc".into()
            }]
        );
        assert!(
            events(json!({"sessionResumptionUpdate": {"resumable": false, "newHandle": "abc"}}))
                .is_empty()
        );
    }

    #[test]
    fn test_server_content_order() {
        let got = events(json!({"serverContent": {
            "turnComplete": true,
            "interrupted": true,
            "outputTranscription": {"text": "Hi"},
            "inputTranscription": {"text": "Hello"},
            "modelTurn": {"parts": [{"inlineData": {"data": "AAA=", "mimeType": "audio/pcm;rate=24000"}}]}
        }}));
        assert_eq!(
            got,
            vec![
                InboundEvent::Interrupted,
                InboundEvent::Transcript(TranscriptFragment::partial(SpeakerRole::User, "Hello")),
                InboundEvent::Transcript(TranscriptFragment::partial(SpeakerRole::Agent, "Hi")),
                InboundEvent::Audio(InboundAudio {
                    data: "AAA=".into(),
                    mime_type: "audio/pcm;rate=24000".into()
                }),
                InboundEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_tool_calls_from_every_shape_are_merged() {
        let got = events(json!({
            "serverContent": {"modelTurn": {"parts": [{"functionCall": {"id": "p1", "name": "a"}}]}},
            "toolCall": {"functionCalls": [{"id": "t1", "name": "b", "args": {"k": 1}}]}
        }));
        let InboundEvent::ToolCalls(calls) = &got[0] else {
            panic!("expected tool calls, got {got:?}");
        };
        let ids: Vec<_> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["p1", "t1"]);
        assert_eq!(calls[1].args, json!({"k": 1}));

        let bare = events(json!({"toolCall": [{"id": "x", "name": "c"}]}));
        assert!(matches!(&bare[0], InboundEvent::ToolCalls(calls) if calls[0].name == "c"));
    }

    #[test]
    fn test_setup_complete_and_go_away() {
        assert_eq!(
            events(json!({"setupComplete": {}})),
            vec![InboundEvent::SetupComplete]
        );
        assert_eq!(
            events(json!({"goAway": {"timeLeft": "10s"}})),
            vec![InboundEvent::GoAway {
                time_left: Some("10s".into())
            }]
        );
    }

    #[test]
    fn test_empty_transcripts_are_skipped() {
        assert!(events(json!({"serverContent": {"inputTranscription": {"text": ""}}})).is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(parse("{not json").is_err());
    }
}
