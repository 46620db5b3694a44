//! Client for the Gemini Live `BidiGenerateContent` protocol.
//!
//! The session controller keeps microphone capture and gapless playback in
//! step with the remote connection state. Devices and the network are behind
//! traits ([`CaptureBackend`], [`PlaybackSink`], [`Connector`]) so the state
//! machine runs the same against real hardware and in tests.

pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod inbound;
pub mod playback;
pub mod session;
pub mod transport;
pub mod types;

pub use capture::{
    AudioCaptureGraph, CaptureBackend, CaptureConfig, CaptureStream, FrameAssembler,
    OutboundAudioFrame,
};
pub use config::{CompressionPolicy, LiveConfig};
pub use error::{CaptureError, ChannelError, DecodeError, PlaybackError, SessionError};
pub use inbound::{InboundAudio, InboundEvent};
pub use playback::{AudioPlaybackScheduler, BufferId, PlaybackSink, ScheduledBuffer};
pub use session::{
    ConnectionState, LiveSessionHandle, SessionCommand, SessionController, SessionEvent,
};
pub use transport::{Channel, Connector, InboundMessage, WsConnector};
