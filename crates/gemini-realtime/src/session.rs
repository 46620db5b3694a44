//! The live session state machine and its control task.
//!
//! A [`SessionController`] owns the channel, the capture graph, the playback
//! scheduler and the connection state. After [`SessionController::init`] it
//! is moved into [`SessionController::run`], a single task that multiplexes
//! inbound frames, captured audio, host commands and the playback reap tick.
//! The host talks to it through the returned [`LiveSessionHandle`] and listens
//! on the [`SessionEvent`] stream.

use crate::audio::{encode_pcm16_base64, input_mime_type};
use crate::capture::{AudioCaptureGraph, CaptureBackend, OutboundAudioFrame};
use crate::config::LiveConfig;
use crate::error::{ChannelError, SessionError};
use crate::inbound::{self, InboundEvent};
use crate::playback::{AudioPlaybackScheduler, PlaybackSink};
use crate::transport::{Channel, Connector, InboundMessage};
use crate::types::{Blob, ClientContent, ClientMessage, Content, RealtimeInput, ToolResponse};
use live_core::{
    ContextSnapshotProvider, SpeakerRole, ToolCallBridge, ToolHost, TranscriptFragment,
    TranscriptMirror, Utterance,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

/// Outbound frames are sent as soon as they are assembled; a backlog
/// beyond this is stale speech and gets dropped at the assembler.
const FRAME_QUEUE_DEPTH: usize = 2;
const COMMAND_QUEUE_DEPTH: usize = 32;
const REAP_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Everything the host can observe about a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connecting,
    Opened,
    /// A reset is reconnecting, with the handle it will present.
    Resuming { handle: Option<String> },
    Closed { reason: Option<String> },
    Error(SessionError),
    /// The running transcript for one speaker changed.
    Transcript { role: SpeakerRole, text: String },
    Utterance(Utterance),
    ModelText(String),
    Interrupted,
    TurnComplete,
    ToolCallsCancelled(Vec<String>),
    GoAway { time_left: Option<String> },
}

/// Requests from the host to the control task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SendText(String),
    StartCapture,
    StopCapture,
    Reset,
    Close,
}

/// The host's handle on a running session.
///
/// Cheap to clone. Results of the requested operations are reported on the
/// event stream.
#[derive(Debug, Clone)]
pub struct LiveSessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl LiveSessionHandle {
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.request(SessionCommand::SendText(text.into())).await
    }

    pub async fn start_capture(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::StartCapture).await
    }

    pub async fn stop_capture(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::StopCapture).await
    }

    /// Reconnects, presenting the latest resumption handle.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Reset).await
    }

    /// Closes the session. Succeeds if it is already gone.
    pub async fn close(&self) {
        if self.commands.send(SessionCommand::Close).await.is_err() {
            debug!("Session task already stopped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped)
    }
}

enum Step {
    Inbound(InboundMessage),
    Frame(OutboundAudioFrame),
    Command(Option<SessionCommand>),
    Reap,
}

pub struct SessionController {
    config: LiveConfig,
    connector: Box<dyn Connector>,
    channel: Option<Box<dyn Channel>>,
    state: ConnectionState,
    /// Set by a local `close()`; nothing reconnects afterwards.
    terminated: bool,
    resumption_handle: Option<String>,
    scheduler: AudioPlaybackScheduler,
    capture: AudioCaptureGraph,
    capture_wanted: bool,
    frames_rx: mpsc::Receiver<OutboundAudioFrame>,
    bridge: ToolCallBridge,
    mirror: TranscriptMirror,
    context: ContextSnapshotProvider,
    events: mpsc::UnboundedSender<SessionEvent>,
    commands: Option<mpsc::Receiver<SessionCommand>>,
}

impl SessionController {
    pub fn new(
        config: LiveConfig,
        connector: Box<dyn Connector>,
        sink: Box<dyn PlaybackSink>,
        microphone: Box<dyn CaptureBackend>,
        tools: Arc<dyn ToolHost>,
        context: ContextSnapshotProvider,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let capture = AudioCaptureGraph::new(microphone, config.capture, frames_tx);
        let controller = Self {
            config,
            connector,
            channel: None,
            state: ConnectionState::Uninitialized,
            terminated: false,
            resumption_handle: None,
            scheduler: AudioPlaybackScheduler::new(sink),
            capture,
            capture_wanted: true,
            frames_rx,
            bridge: ToolCallBridge::new(tools),
            mirror: TranscriptMirror::new(),
            context,
            events,
            commands: None,
        };
        (controller, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn resumption_handle(&self) -> Option<&str> {
        self.resumption_handle.as_deref()
    }

    /// Opens playback, starts a context refresh and connects.
    ///
    /// A failed connect leaves the session `Errored` (reported on the event
    /// stream) and still returns the handle, so the host can `reset()`.
    #[instrument(skip(self))]
    pub async fn init(&mut self) -> Result<LiveSessionHandle, SessionError> {
        if self.state != ConnectionState::Uninitialized || self.terminated {
            return Err(self.invalid("init"));
        }
        if let Err(e) = self.scheduler.open() {
            error!(error = %e, "Failed to open playback");
            self.set_state(ConnectionState::Errored);
            self.emit(SessionEvent::Error(e.clone().into()));
            return Err(e.into());
        }

        let context = self.context.clone();
        tokio::spawn(async move { context.refresh().await });

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        self.commands = Some(commands_rx);

        if let Err(e) = self.connect(None).await {
            warn!(error = %e, "Initial connect failed");
        }
        Ok(LiveSessionHandle {
            commands: commands_tx,
        })
    }

    /// Connects with the given resumption handle. A no-op while open.
    #[instrument(skip_all, fields(resuming = resumption_handle.is_some()))]
    pub async fn connect(&mut self, resumption_handle: Option<String>) -> Result<(), SessionError> {
        if self.terminated {
            return Err(self.invalid("connect"));
        }
        if self.state == ConnectionState::Open && self.channel.is_some() {
            debug!("Already open; not opening a second channel");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        self.emit(SessionEvent::Connecting);
        let setup = self.config.setup(self.bridge.declarations(), resumption_handle);
        match self.connector.connect(&setup).await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.set_state(ConnectionState::Open);
                self.emit(SessionEvent::Opened);
                if self.capture_wanted {
                    self.arm_capture();
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to open live session");
                self.set_state(ConnectionState::Errored);
                self.emit(SessionEvent::Error(e.clone().into()));
                Err(e.into())
            }
        }
    }

    /// Applies one inbound frame or channel signal.
    pub async fn handle_inbound(&mut self, message: InboundMessage) {
        if self.terminated {
            trace!("Ignoring inbound message after close");
            return;
        }
        match message {
            InboundMessage::Text(text) => match inbound::parse(&text) {
                Ok(events) => {
                    for event in events {
                        self.apply(event).await;
                    }
                }
                Err(e) => warn!(error = %e, "Dropping unparseable server message"),
            },
            InboundMessage::Closed(reason) => {
                info!(?reason, "Live session closed by remote");
                self.channel = None;
                self.capture.stop();
                self.set_state(ConnectionState::Closed);
                self.emit(SessionEvent::Closed { reason });
            }
            InboundMessage::Failed(e) => {
                error!(error = %e, "Live transport failed");
                self.mark_failed();
                self.emit(SessionEvent::Error(e.into()));
            }
        }
    }

    /// Reconnects with the stored resumption handle.
    #[instrument(skip(self))]
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        if self.terminated || self.state == ConnectionState::Uninitialized {
            return Err(self.invalid("reset"));
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.capture.stop();
        self.scheduler.interrupt();
        self.mirror.clear();

        let handle = self.resumption_handle.clone();
        info!(resuming = handle.is_some(), "Resetting live session");
        self.emit(SessionEvent::Resuming {
            handle: handle.clone(),
        });
        self.connect(handle).await
    }

    /// Stops capture, closes playback and the channel. Valid from any state.
    #[instrument(skip(self))]
    pub async fn close(&mut self) {
        self.capture.stop();
        self.scheduler.close();
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        if !self.terminated {
            self.terminated = true;
            self.set_state(ConnectionState::Closed);
            self.emit(SessionEvent::Closed { reason: None });
        }
    }

    pub async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.send(ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), text)],
            turn_complete: true,
        }))
        .await
    }

    /// Drives the session until it is closed or every handle is dropped.
    pub async fn run(mut self) {
        let Some(mut commands) = self.commands.take() else {
            warn!("Session run without init; nothing to do");
            return;
        };
        let mut reap = tokio::time::interval(REAP_INTERVAL);
        reap.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let step = tokio::select! {
                message = next_inbound(&mut self.channel) => Step::Inbound(message),
                Some(frame) = self.frames_rx.recv() => Step::Frame(frame),
                command = commands.recv() => Step::Command(command),
                _ = reap.tick() => Step::Reap,
            };
            match step {
                Step::Inbound(message) => self.handle_inbound(message).await,
                Step::Frame(frame) => self.send_frame(frame).await,
                Step::Command(None) | Step::Command(Some(SessionCommand::Close)) => {
                    self.close().await;
                    break;
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Reap => self.scheduler.reap(),
            }
        }
        info!("Session task finished");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        debug!(?command, "Session command");
        let result = match command {
            SessionCommand::SendText(text) => self.send_text(text).await,
            SessionCommand::StartCapture => {
                self.capture_wanted = true;
                if self.state == ConnectionState::Open {
                    self.arm_capture();
                }
                Ok(())
            }
            SessionCommand::StopCapture => {
                self.capture_wanted = false;
                self.capture.stop();
                Ok(())
            }
            SessionCommand::Reset => self.reset().await,
            SessionCommand::Close => {
                self.close().await;
                Ok(())
            }
        };
        // Connect failures are reported where they happen.
        if let Err(e) = result {
            if !matches!(e, SessionError::Channel(ChannelError::Connect(_) | ChannelError::Setup(_))) {
                self.emit(SessionEvent::Error(e));
            }
        }
    }

    async fn apply(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::SetupComplete => debug!("Late setupComplete"),
            InboundEvent::ResumptionUpdate { handle } => {
                debug!("Stored new resumption handle");
                self.resumption_handle = Some(handle);
            }
            InboundEvent::Interrupted => {
                self.scheduler.interrupt();
                self.emit(SessionEvent::Interrupted);
            }
            InboundEvent::Transcript(fragment) => {
                let role = fragment.role;
                self.mirror.apply(fragment);
                let text = self.mirror.current(role).to_string();
                self.emit(SessionEvent::Transcript { role, text });
            }
            InboundEvent::Audio(audio) => {
                if let Err(e) = self.scheduler.enqueue(&audio) {
                    warn!(error = %e, "Dropping inbound audio frame");
                    self.emit(SessionEvent::Error(e));
                }
            }
            InboundEvent::ModelText(text) => self.emit(SessionEvent::ModelText(text)),
            InboundEvent::ToolCalls(calls) => {
                let responses = self.bridge.answer(calls).await;
                let message = ClientMessage::ToolResponse(ToolResponse {
                    function_responses: responses.into_iter().map(Into::into).collect(),
                });
                if let Err(e) = self.send(message).await {
                    self.emit(SessionEvent::Error(e));
                }
            }
            InboundEvent::ToolCallsCancelled(ids) => {
                info!(?ids, "Remote cancelled tool calls");
                self.emit(SessionEvent::ToolCallsCancelled(ids));
            }
            InboundEvent::TurnComplete => {
                for role in [SpeakerRole::User, SpeakerRole::Agent] {
                    if let Some(utterance) = self.mirror.apply(TranscriptFragment::complete(role)) {
                        self.emit(SessionEvent::Utterance(utterance));
                    }
                }
                self.emit(SessionEvent::TurnComplete);
            }
            InboundEvent::GoAway { time_left } => {
                warn!(?time_left, "Remote will close the session soon");
                self.emit(SessionEvent::GoAway { time_left });
            }
        }
    }

    async fn send_frame(&mut self, frame: OutboundAudioFrame) {
        if self.state != ConnectionState::Open {
            trace!("Dropping captured frame while not open");
            return;
        }
        let message = ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: input_mime_type(),
                data: encode_pcm16_base64(&frame.samples),
            },
        });
        if let Err(e) = self.send(message).await {
            self.emit(SessionEvent::Error(e));
        }
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(ChannelError::NotOpen.into());
        };
        if let Err(e) = channel.send(&message).await {
            error!(error = %e, "Failed to send to live session");
            self.mark_failed();
            return Err(e.into());
        }
        Ok(())
    }

    fn arm_capture(&mut self) {
        if let Err(e) = self.capture.start() {
            warn!(error = %e, "Microphone unavailable; continuing without capture");
            self.emit(SessionEvent::Error(e.into()));
        }
    }

    fn mark_failed(&mut self) {
        self.channel = None;
        self.capture.stop();
        self.set_state(ConnectionState::Errored);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Session state changed");
            self.state = next;
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            operation,
            state: self.state,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("No one is listening for session events");
        }
    }
}

async fn next_inbound(channel: &mut Option<Box<dyn Channel>>) -> InboundMessage {
    match channel {
        Some(channel) => channel
            .recv()
            .await
            .unwrap_or(InboundMessage::Closed(None)),
        None => std::future::pending().await,
    }
}
