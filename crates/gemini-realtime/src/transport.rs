//! The bidirectional channel to the remote service.
//!
//! [`Connector`] and [`Channel`] are the seam between the session state
//! machine and the network. [`WsConnector`] is the real implementation over
//! tokio-tungstenite; session tests plug in in-memory fakes.

use crate::config::LiveConfig;
use crate::types::{ClientMessage, ServerMessage, Setup};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::error::ChannelError;

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// One frame (or lifecycle signal) read from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A JSON server message.
    Text(String),
    /// The remote closed the channel, optionally with a reason.
    Closed(Option<String>),
    /// The transport failed.
    Failed(ChannelError),
}

/// Opens a channel and completes the setup handshake.
#[async_trait]
pub trait Connector: Send {
    /// Resolves once the remote has acknowledged `setup`.
    async fn connect(&mut self, setup: &Setup) -> Result<Box<dyn Channel>, ChannelError>;
}

/// An open, set-up channel.
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), ChannelError>;

    /// Next inbound frame. `None` once the stream has ended.
    ///
    /// Must be cancel safe: the session polls it inside `select!`.
    async fn recv(&mut self) -> Option<InboundMessage>;

    /// Closes the channel. Errors are logged, not returned.
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the `BidiGenerateContent` WebSocket endpoint.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            url: format!("{}?key={}", config.endpoint, config.api_key.expose_secret()),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&mut self, setup: &Setup) -> Result<Box<dyn Channel>, ChannelError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        info!(model = %setup.model, "Connected to live WebSocket");
        let (sink, stream) = ws_stream.split();
        let mut channel = WsChannel { sink, stream };

        channel.send(&ClientMessage::Setup(setup.clone())).await?;
        match tokio::time::timeout(SETUP_TIMEOUT, channel.await_setup_complete()).await {
            Ok(Ok(())) => {
                info!("Live session setup is complete");
                Ok(Box::new(channel))
            }
            Ok(Err(e)) => {
                channel.close().await;
                Err(e)
            }
            Err(_) => {
                channel.close().await;
                Err(ChannelError::Setup(format!(
                    "no setupComplete within {}s",
                    SETUP_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

struct WsChannel {
    sink: SplitSink<WsStream, WsMessage>,
    stream: SplitStream<WsStream>,
}

impl WsChannel {
    async fn await_setup_complete(&mut self) -> Result<(), ChannelError> {
        loop {
            match self.recv().await {
                Some(InboundMessage::Text(text)) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) if msg.setup_complete.is_some() => return Ok(()),
                        Ok(_) => warn!("Received server message before setup was complete. Ignoring."),
                        Err(_) => error!(raw = %text, "Failed to parse server message during setup"),
                    }
                }
                Some(InboundMessage::Closed(reason)) => {
                    return Err(ChannelError::Setup(
                        reason.unwrap_or_else(|| "closed during setup".to_string()),
                    ));
                }
                Some(InboundMessage::Failed(e)) => return Err(e),
                None => return Err(ChannelError::Setup("stream ended during setup".into())),
            }
        }
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_string(message).map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.sink
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<InboundMessage> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(InboundMessage::Failed(ChannelError::Transport(e.to_string()))),
            };
            match message {
                WsMessage::Text(text) => return Some(InboundMessage::Text(text.to_string())),
                // The service sends JSON in binary frames as well.
                WsMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(InboundMessage::Text(text)),
                    Err(_) => warn!(len = data.len(), "Dropping non-UTF-8 binary frame"),
                },
                WsMessage::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    info!(?reason, "Live WebSocket closed by remote");
                    return Some(InboundMessage::Closed(reason));
                }
                other => debug!(?other, "Ignoring control frame"),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Error while closing live WebSocket");
        }
    }
}
