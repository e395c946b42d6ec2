//! Error type shared by the relay modules.

use std::path::PathBuf;
use std::time::Duration;

/// Error type for relay operations.
///
/// None of these are fatal to a running client: connection errors end the
/// current session and trigger a reconnect, payload errors drop one message.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The endpoint could not be converted to a websocket URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The websocket connection, handshake, or a send on it failed.
    #[error("websocket error: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The websocket was closed by the peer.
    #[error("websocket closed")]
    WsClosed,
    /// A text message could not be decoded as a Socket.IO packet.
    #[error("packet decode failed: {0}")]
    Decode(#[from] packets::CodecError),
    /// The server did not follow the Engine.IO / Socket.IO open sequence.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The server refused the namespace connect.
    #[error("namespace {namespace} rejected connect: {message}")]
    ConnectRejected { namespace: String, message: String },
    /// The server ended the namespace session.
    #[error("server disconnected namespace {0}")]
    ServerDisconnect(String),
    /// A bounded wait elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// No packet arrived within the heartbeat window.
    #[error("no heartbeat within {0:?}")]
    HeartbeatExpired(Duration),
    /// A frame payload was empty after trimming its header.
    #[error("empty frame payload")]
    EmptyPayload,
    /// A frame payload is not valid base64.
    #[error("frame payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
    /// An image file backing a capture source could not be read.
    #[error("failed to read capture source {}: {source}", path.display())]
    CaptureIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WsConnect(Box::new(error))
    }
}
