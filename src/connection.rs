//! Socket connection to the remote processing service.
//!
//! DESIGN
//! ======
//! A [`Connection`] is the component-side handle; a spawned driver task owns
//! the websocket. The halves only talk over channels:
//! - outbound [`WireMessage`]s go through a small bounded queue. Sends are
//!   fire-and-forget: dropped when the session is not open or the queue is
//!   full, never awaited.
//! - inbound [`ConnectionEvent`]s are pushed onto a single-consumer channel
//!   that the owner drains on its own schedule.
//! - [`ConnectionStatus`] is published on a watch channel.
//!
//! LIFECYCLE
//! =========
//! 1. `open` spawns the driver and returns immediately
//! 2. Driver connects: websocket → Engine.IO open → Socket.IO namespace connect
//! 3. Driver relays events, answers pings, and watches the heartbeat
//! 4. Session loss → backoff → reconnect (step 2)
//! 5. `close` or drop → best-effort disconnect; in-flight traffic is abandoned
//!    and a driver that has not stopped after a grace period is aborted

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use packets::{EnginePacket, Handshake, SocketPacket};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;

/// Outbound event carrying one sampled frame.
pub const WEBCAM_FRAME_EVENT: &str = "webcam_frame";
/// Inbound event carrying one processed frame.
pub const PROCESSED_FRAME_EVENT: &str = "processed_frame";

const CLOSE_GRACE: Duration = Duration::from_millis(250);
/// How long a closed connection's driver may keep running before it is aborted.
const DRIVER_GRACE: Duration = Duration::from_millis(500);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection status as seen by the owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// One named message with a text payload, in either direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    pub event: String,
    pub payload: String,
}

impl WireMessage {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
        }
    }
}

/// Something the driver reports to the owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A session reached the connected state.
    Connected { sid: String },
    /// A connected session ended; the driver will retry if configured to.
    Disconnected { reason: String },
    /// An inbound event whose first argument is a string.
    Message(WireMessage),
}

/// What happened to a fire-and-forget send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the socket writer.
    Queued,
    /// No open session; dropped.
    NotOpen,
    /// Writer is behind; dropped.
    QueueFull,
    /// Connection closed; dropped.
    Closed,
}

/// Owner handle for one connection.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::Sender<WireMessage>,
    events: mpsc::Receiver<ConnectionEvent>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

/// Driver side of a [`Connection`].
///
/// The websocket driver consumes one of these; tests and alternative
/// transports can drive it by hand.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Receiver<WireMessage>,
    pub events: mpsc::Sender<ConnectionEvent>,
    pub status: watch::Sender<ConnectionStatus>,
    pub shutdown: oneshot::Receiver<()>,
}

impl Connection {
    /// Start connecting to the configured endpoint in the background.
    ///
    /// Never fails: connection errors are logged by the driver and retried
    /// according to the reconnect policy.
    #[must_use]
    pub fn open(config: &RelayConfig) -> Self {
        let (mut connection, link) =
            Self::channel(config.outbound_capacity, config.inbound_capacity);
        connection.driver = Some(tokio::spawn(run_driver(config.clone(), link)));
        connection
    }

    /// Create a connection handle and its unattached driver side.
    #[must_use]
    pub fn channel(outbound_capacity: usize, inbound_capacity: usize) -> (Self, Link) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let (events_tx, events_rx) = mpsc::channel(inbound_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let connection = Self {
            outbound: outbound_tx,
            events: events_rx,
            status: status_rx,
            shutdown: Some(shutdown_tx),
            driver: None,
        };
        let link = Link {
            outbound: outbound_rx,
            events: events_tx,
            status: status_tx,
            shutdown: shutdown_rx,
        };
        (connection, link)
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        if self.shutdown.is_none() {
            return ConnectionStatus::Closed;
        }
        *self.status.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    /// Fire-and-forget send of one event.
    ///
    /// Never waits. The outcome is informational; dropping a frame is normal
    /// operation when the session is down or the writer is behind.
    pub fn send(&self, event: &str, payload: String) -> SendOutcome {
        match self.status() {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Closed => return SendOutcome::Closed,
            ConnectionStatus::Connecting | ConnectionStatus::Disconnected => {
                return SendOutcome::NotOpen;
            }
        }

        match self.outbound.try_send(WireMessage::new(event, payload)) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Wait for the next inbound event.
    ///
    /// Returns `None` once the driver is gone.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Take the next inbound event if one is already buffered.
    pub fn try_next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }

    /// Signal the driver to stop. Idempotent; does not wait for the driver.
    ///
    /// A driver still running after a short grace period is aborted.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            debug!("relay connection close requested");
        }
        if let Some(driver) = self.driver.take() {
            // Without a runtime the driver cannot make progress anyway.
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(reap_driver(driver));
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// DRIVER
// =============================================================================

async fn reap_driver(mut driver: JoinHandle<()>) {
    if tokio::time::timeout(DRIVER_GRACE, &mut driver).await.is_err() {
        warn!(grace_ms = DRIVER_GRACE.as_millis(), "relay driver did not stop; aborting");
        driver.abort();
    }
}

enum SessionEnd {
    Shutdown,
    Lost {
        error: RelayError,
        was_connected: bool,
    },
}

async fn run_driver(config: RelayConfig, mut link: Link) {
    let url = match config.socket_url() {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "relay connection disabled");
            link.status.send_replace(ConnectionStatus::Disconnected);
            let _ = (&mut link.shutdown).await;
            link.status.send_replace(ConnectionStatus::Closed);
            return;
        }
    };

    let mut attempt: u32 = 0;
    loop {
        link.status.send_replace(ConnectionStatus::Connecting);
        debug!(%url, attempt, "relay connecting");

        match run_session(&url, &config, &mut link).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost {
                error,
                was_connected,
            } => {
                link.status.send_replace(ConnectionStatus::Disconnected);
                if was_connected {
                    attempt = 0;
                    warn!(error = %error, "relay connection lost");
                    let event = ConnectionEvent::Disconnected {
                        reason: error.to_string(),
                    };
                    if !emit(&mut link, event).await {
                        break;
                    }
                } else {
                    warn!(error = %error, attempt, "relay connect failed");
                }
            }
        }

        if !config.reconnect.enabled {
            info!("relay reconnection disabled; waiting for close");
            let _ = (&mut link.shutdown).await;
            break;
        }

        let delay = config.reconnect.jittered(attempt, &mut rand::rng());
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis(), "relay reconnect scheduled");

        tokio::select! {
            _ = &mut link.shutdown => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    link.status.send_replace(ConnectionStatus::Closed);
    debug!("relay connection driver stopped");
}

/// Connect, relay until the session ends, and report why it ended.
async fn run_session(url: &str, config: &RelayConfig, link: &mut Link) -> SessionEnd {
    let namespace = config.namespace.as_str();
    let connect = tokio::time::timeout(config.connect_timeout, handshake(url, namespace));

    let (mut stream, open, sid) = tokio::select! {
        _ = &mut link.shutdown => return SessionEnd::Shutdown,
        result = connect => match result {
            Ok(Ok(session)) => session,
            Ok(Err(error)) => return SessionEnd::Lost { error, was_connected: false },
            Err(_) => {
                return SessionEnd::Lost {
                    error: RelayError::Timeout("socket.io handshake"),
                    was_connected: false,
                };
            }
        },
    };

    // Frames queued for a previous session are stale.
    while link.outbound.try_recv().is_ok() {}

    link.status.send_replace(ConnectionStatus::Connected);
    info!(%sid, engine_sid = %open.sid, namespace, "relay connected");
    if !emit(link, ConnectionEvent::Connected { sid }).await {
        disconnect(&mut stream, namespace).await;
        return SessionEnd::Shutdown;
    }

    let liveness = open.liveness_timeout();
    let heartbeat = tokio::time::sleep(liveness);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            _ = &mut link.shutdown => {
                disconnect(&mut stream, namespace).await;
                return SessionEnd::Shutdown;
            }
            () = &mut heartbeat => {
                return lost(RelayError::HeartbeatExpired(liveness));
            }
            Some(message) = link.outbound.recv() => {
                let packet = EnginePacket::Message(SocketPacket::event(
                    namespace,
                    &message.event,
                    Value::String(message.payload),
                ));
                if let Err(e) = send_packet(&mut stream, &packet).await {
                    return lost(e);
                }
                trace!(event = %message.event, "relay frame sent");
            }
            incoming = stream.next() => {
                let Some(incoming) = incoming else {
                    return lost(RelayError::WsClosed);
                };
                let text = match incoming {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => return lost(RelayError::WsClosed),
                    Ok(_) => continue,
                    Err(e) => return lost(e.into()),
                };
                heartbeat.as_mut().reset(Instant::now() + liveness);

                let packet = match packets::decode_packet(text.as_str()) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(error = %e, "relay ignoring undecodable packet");
                        continue;
                    }
                };

                match packet {
                    EnginePacket::Ping(data) => {
                        if let Err(e) = send_packet(&mut stream, &EnginePacket::Pong(data)).await {
                            return lost(e);
                        }
                    }
                    EnginePacket::Close => return lost(RelayError::WsClosed),
                    EnginePacket::Message(SocketPacket::Disconnect { namespace: ns }) if ns == namespace => {
                        return lost(RelayError::ServerDisconnect(ns));
                    }
                    EnginePacket::Message(SocketPacket::Event { namespace: ns, name, args, .. }) if ns == namespace => {
                        let Some(message) = inbound_message(name, args) else {
                            debug!("relay ignoring event without text payload");
                            continue;
                        };
                        if !offer(link, message) {
                            disconnect(&mut stream, namespace).await;
                            return SessionEnd::Shutdown;
                        }
                    }
                    other => trace!(packet = ?other, "relay ignoring packet"),
                }
            }
        }
    }
}

fn lost(error: RelayError) -> SessionEnd {
    SessionEnd::Lost {
        error,
        was_connected: true,
    }
}

/// Websocket connect plus the Engine.IO open and Socket.IO connect exchange.
async fn handshake(
    url: &str,
    namespace: &str,
) -> Result<(WsStream, Handshake, String), RelayError> {
    let (mut stream, _) = connect_async(url).await?;

    let open = match next_packet(&mut stream).await? {
        EnginePacket::Open(open) => open,
        other => {
            return Err(RelayError::Handshake(format!(
                "expected open packet, got {other:?}"
            )));
        }
    };

    let connect = EnginePacket::Message(SocketPacket::Connect {
        namespace: namespace.to_owned(),
        data: None,
    });
    send_packet(&mut stream, &connect).await?;

    loop {
        match next_packet(&mut stream).await? {
            EnginePacket::Message(SocketPacket::Connect { namespace: ns, data }) if ns == namespace => {
                let sid = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .map_or_else(|| open.sid.clone(), ToOwned::to_owned);
                return Ok((stream, open, sid));
            }
            EnginePacket::Message(SocketPacket::ConnectError { namespace: ns, data }) => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| data.to_string(), ToOwned::to_owned);
                return Err(RelayError::ConnectRejected {
                    namespace: ns,
                    message,
                });
            }
            EnginePacket::Ping(data) => send_packet(&mut stream, &EnginePacket::Pong(data)).await?,
            EnginePacket::Close => return Err(RelayError::WsClosed),
            _ => {}
        }
    }
}

async fn next_packet(stream: &mut WsStream) -> Result<EnginePacket, RelayError> {
    loop {
        let Some(message) = stream.next().await else {
            return Err(RelayError::WsClosed);
        };
        match message? {
            Message::Text(text) => return Ok(packets::decode_packet(text.as_str())?),
            Message::Close(_) => return Err(RelayError::WsClosed),
            _ => {}
        }
    }
}

async fn send_packet(stream: &mut WsStream, packet: &EnginePacket) -> Result<(), RelayError> {
    let text = packets::encode_packet(packet);
    stream.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Best-effort namespace disconnect and websocket close.
async fn disconnect(stream: &mut WsStream, namespace: &str) {
    let goodbye = EnginePacket::Message(SocketPacket::Disconnect {
        namespace: namespace.to_owned(),
    });
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = send_packet(stream, &goodbye).await;
        let _ = stream.close(None).await;
    })
    .await;
}

/// Forward a lifecycle event to the owner, giving up if the connection is
/// closed.
async fn emit(link: &mut Link, event: ConnectionEvent) -> bool {
    tokio::select! {
        _ = &mut link.shutdown => false,
        sent = link.events.send(event) => sent.is_ok(),
    }
}

/// Hand an inbound message to the owner without waiting.
///
/// A full channel drops the message so a slow owner never stalls the socket.
/// Returns `false` only once the owner is gone.
fn offer(link: &Link, message: WireMessage) -> bool {
    let event = message.event.clone();
    match link.events.try_send(ConnectionEvent::Message(message)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%event, "relay inbound channel full; dropping message");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn inbound_message(name: String, args: Vec<Value>) -> Option<WireMessage> {
    match args.into_iter().next()? {
        Value::String(payload) => Some(WireMessage {
            event: name,
            payload,
        }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
