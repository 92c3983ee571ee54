// ABOUTME: WebSocket connection handler
// ABOUTME: Registers a sink per client, forwards frames, and unregisters when the client goes away

use crate::server::config::ServerConfig;
use crate::server::registry::ClientRegistry;
use crate::server::sink::{ChannelSink, Sink, SinkId};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{Sink as WsSink, SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Connection lifecycle: `Connecting -> Registered -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade accepted, sink not yet registered
    Connecting,
    /// Sink registered and receiving frames
    Registered,
    /// Sink unregistered, transport released
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent a message (any content ends the session)
    Message,
    /// Client closed the connection
    Closed,
    /// Transport error while reading
    ReadError(String),
    /// Writer gave up (send failed, timed out, or the sink was pruned)
    WriterStopped(WriterExit),
}

/// How the writer task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// Frame queue closed: the dispatcher pruned the sink
    QueueClosed,
    /// The socket rejected a frame
    SendFailed,
    /// A single send exceeded the send timeout
    TimedOut,
    /// The task was cancelled or panicked
    Aborted,
}

impl fmt::Display for WriterExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterExit::QueueClosed => write!(f, "queue closed"),
            WriterExit::SendFailed => write!(f, "send failed"),
            WriterExit::TimedOut => write!(f, "send timed out"),
            WriterExit::Aborted => write!(f, "writer aborted"),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Message => write!(f, "client sent a message"),
            DisconnectReason::Closed => write!(f, "client closed the connection"),
            DisconnectReason::ReadError(e) => write!(f, "read error: {}", e),
            DisconnectReason::WriterStopped(exit) => write!(f, "writer stopped: {}", exit),
        }
    }
}

/// Keeps a sink registered for as long as it is alive.
///
/// Unregisters exactly once, on every exit path including panics and task
/// cancellation.
struct Registration {
    registry: Arc<ClientRegistry>,
    id: SinkId,
}

impl Registration {
    fn new(registry: Arc<ClientRegistry>, sink: Arc<dyn Sink>) -> Self {
        let id = sink.id();
        registry.register(sink);
        Self { registry, id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Handle one client for the lifetime of its connection.
///
/// The client never needs to send anything. The first inbound message,
/// close, or error ends the session.
pub async fn handle_connection(
    socket: WebSocket,
    registry: Arc<ClientRegistry>,
    config: Arc<ServerConfig>,
) {
    let mut state = ConnectionState::Connecting;
    let (ws_tx, mut ws_rx) = socket.split();

    let (sink, rx) = ChannelSink::new(config.sink_queue_frames);
    let sink_id = sink.id();
    log::debug!("Connection {}: {:?}", sink_id, state);

    let registration = Registration::new(registry, Arc::new(sink));
    state = ConnectionState::Registered;
    log::debug!("Connection {}: {:?}", sink_id, state);

    let mut send_task = tokio::spawn(forward_frames(sink_id, rx, ws_tx, config.send_timeout()));

    let reason = tokio::select! {
        reason = wait_for_disconnect(&mut ws_rx) => reason,
        exit = &mut send_task => {
            DisconnectReason::WriterStopped(exit.unwrap_or(WriterExit::Aborted))
        }
    };

    drop(registration);
    send_task.abort();
    state = ConnectionState::Closed;
    log::debug!("Connection {}: {:?}", sink_id, state);
    log::info!("Client {} disconnected ({})", sink_id, reason);
}

/// Forward queued frames to the socket until the queue closes or a send
/// fails or exceeds `send_timeout`
async fn forward_frames<W>(
    sink_id: SinkId,
    mut rx: mpsc::Receiver<Bytes>,
    mut ws_tx: W,
    send_timeout: Duration,
) -> WriterExit
where
    W: WsSink<WsMessage> + Unpin,
    W::Error: fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        match tokio::time::timeout(send_timeout, ws_tx.send(WsMessage::Binary(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::debug!("Client {} send failed: {}", sink_id, e);
                return WriterExit::SendFailed;
            }
            Err(_) => {
                log::debug!("Client {} send timed out after {:?}", sink_id, send_timeout);
                return WriterExit::TimedOut;
            }
        }
    }
    log::debug!("Client {} queue closed", sink_id);
    WriterExit::QueueClosed
}

/// Block until the client does anything
async fn wait_for_disconnect(ws_rx: &mut SplitStream<WebSocket>) -> DisconnectReason {
    loop {
        match ws_rx.next().await {
            // Control frames are keepalive traffic, answered by axum
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Close(_))) | None => return DisconnectReason::Closed,
            Some(Ok(_)) => return DisconnectReason::Message,
            Some(Err(e)) => return DisconnectReason::ReadError(e.to_string()),
        }
    }
}
