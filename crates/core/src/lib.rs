//! Host-facing building blocks for live multimodal sessions.
//!
//! Nothing in this crate talks to the remote service directly. It provides the
//! pieces a session delegates to: tool dispatch, transcript reconstruction,
//! and grounding context, plus the one-shot multimodal client.

pub mod context;
pub mod llm_client;
pub mod mcp;
pub mod tool;
pub mod transcript;
pub mod workspace;

pub use context::{ContextSnapshot, ContextSnapshotProvider, ContextSource};
pub use tool::{
    FunctionDeclaration, ToolCallBridge, ToolCallRequest, ToolCallResponse, ToolDispatchError,
    ToolHost, ToolRegistry,
};
pub use transcript::{SpeakerRole, TranscriptFragment, TranscriptMirror, Utterance};
