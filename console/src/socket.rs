//! Console socket layer.
//!
//! A socket is a transient resource bound to one (instance, generation) pair
//! and owned exclusively by the session controller. Its whole contract is the
//! event sequence it delivers: exactly one [`SocketEvent::Opened`], zero or
//! more [`SocketEvent::Frame`]s in transport order, terminated by exactly one
//! [`SocketEvent::Closed`]. The controller above can therefore treat every
//! socket generation identically regardless of why it was opened.

use crate::error::SessionError;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::InstanceId;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Why a socket stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally through [`ConsoleSocket::close`].
    Normal,
    /// The transport failed mid-session.
    Error,
    /// The remote side closed the connection.
    RemoteClosed,
}

/// Events a socket delivers to its owner, in order, never concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Frame(String),
    Closed(CloseReason),
}

/// Send/close half of an open console socket.
pub trait ConsoleSocket {
    /// Queues one command line for transmission. Fails with
    /// [`SessionError::NotOpen`] after `close` has been called.
    fn send(&mut self, line: &str) -> Result<(), SessionError>;

    /// Idempotent; only the first call has effect.
    fn close(&mut self);
}

/// Factory for console sockets, one per (instance, generation).
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Socket: ConsoleSocket;

    /// Opens a new socket to the instance's console endpoint and returns it
    /// together with the receiver its events arrive on.
    async fn connect(
        &mut self,
        instance: &InstanceId,
    ) -> Result<(Self::Socket, mpsc::UnboundedReceiver<SocketEvent>), SessionError>;
}

enum SocketCommand {
    Send(String),
    Close,
}

/// WebSocket-backed console socket.
///
/// The tungstenite stream itself lives in a spawned task; this handle only
/// holds the command channel into it, so `send` and `close` never block.
pub struct WsSocket {
    commands: mpsc::UnboundedSender<SocketCommand>,
    closed: bool,
}

impl ConsoleSocket for WsSocket {
    fn send(&mut self, line: &str) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::NotOpen);
        }
        self.commands
            .send(SocketCommand::Send(line.to_string()))
            .map_err(|_| SessionError::NotOpen)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.commands.send(SocketCommand::Close);
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connects [`WsSocket`]s against a fixed control-plane base URL.
pub struct WsConnector {
    base: String,
}

impl WsConnector {
    pub fn new(base: impl Into<String>) -> Self {
        WsConnector { base: base.into() }
    }
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    async fn connect(
        &mut self,
        instance: &InstanceId,
    ) -> Result<(WsSocket, mpsc::UnboundedReceiver<SocketEvent>), SessionError> {
        let url = shared::console_url(&self.base, instance);
        debug!("Connecting console socket to {}", url);

        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SessionError::TransportUnavailable(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(socket_task(stream, event_tx, command_rx));
        info!("Console socket connected to {}", url);

        Ok((
            WsSocket {
                commands: command_tx,
                closed: false,
            },
            event_rx,
        ))
    }
}

/// Owns the WebSocket stream for one socket generation. Emits `Opened` once,
/// then frames in transport order, and exits after emitting exactly one
/// `Closed`.
async fn socket_task(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
) {
    let (mut sink, mut source) = stream.split();
    let _ = events.send(SocketEvent::Opened);

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Send(line)) => {
                    if let Err(e) = sink.send(Message::Text(line)).await {
                        warn!("Console socket send failed: {}", e);
                        break CloseReason::Error;
                    }
                }
                // Handle dropped without close: treat as close.
                Some(SocketCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break CloseReason::Normal;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Frame(text));
                }
                // The host sends stderr lines as binary frames so the two
                // streams can be told apart on the wire.
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events.send(SocketEvent::Frame(text));
                }
                Some(Ok(Message::Close(_))) | None => {
                    break CloseReason::RemoteClosed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Console socket errored: {}", e);
                    break CloseReason::Error;
                }
            },
        }
    };

    debug!("Console socket task exiting: {:?}", reason);
    let _ = events.send(SocketEvent::Closed(reason));
}
