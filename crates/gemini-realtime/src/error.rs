//! Error taxonomy for live sessions.
//!
//! Only transport and permission failures reach the host as session errors.
//! Frame decode and tool dispatch failures are contained where they happen.

use crate::session::ConnectionState;

/// Microphone capture could not start. Fatal to capture only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone access denied or unsupported: {0}")]
    Permission(String),
    #[error("audio capture failed: {0}")]
    Device(String),
}

/// The playback device could not be opened or driven.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("audio playback failed: {0}")]
pub struct PlaybackError(pub String);

/// A malformed inbound audio frame. The frame is dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("audio payload is not valid base64: {0}")]
    Base64(String),
    #[error("audio payload has an odd byte count ({0})")]
    OddLength(usize),
    #[error("audio payload is empty")]
    Empty,
    #[error("unsupported audio mime type '{0}'")]
    MimeType(String),
    #[error("unsupported audio sample rate {0} Hz")]
    SampleRate(u32),
}

/// Connecting to, or talking over, the bidirectional channel failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("setup was not acknowledged: {0}")]
    Setup(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to encode outbound message: {0}")]
    Encode(String),
    #[error("channel is not open")]
    NotOpen,
}

/// Errors returned by [`crate::session::SessionController`] operations and
/// reported on the session event stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("cannot {operation} while session is {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: ConnectionState,
    },
    #[error("session task has stopped")]
    Stopped,
}
