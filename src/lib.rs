//! Webcam frame relay.
//!
//! Samples still images from a capture source on a fixed timer, streams them
//! to a remote processing service as Socket.IO `webcam_frame` events, and
//! keeps the most recent `processed_frame` reply ready for display.
//!
//! ```no_run
//! use framerelay::{FrameRelayClient, RelayConfig, SocketIoConnector, snapshot_feed};
//!
//! # async fn demo() {
//! let (publisher, feed) = snapshot_feed();
//! let mut client = FrameRelayClient::new(RelayConfig::from_env(), feed);
//! client.mount(&SocketIoConnector);
//!
//! publisher.publish("data:image/jpeg;base64,/9j/4AAQ");
//! client.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//! client.unmount();
//! # }
//! ```

pub mod capture;
pub mod client;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod frame;

pub use capture::{CaptureSource, ImageDirSource, SnapshotFeed, SnapshotPublisher, snapshot_feed};
pub use client::{
    Connector, FrameRelayClient, Lifecycle, RelayStats, SocketIoConnector, TickOutcome,
};
pub use config::{ReconnectPolicy, RelayConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionStatus, SendOutcome, WireMessage};
pub use display::{DisplayHandle, DisplaySurface, View};
pub use error::RelayError;
pub use frame::{FrameSample, ProcessedFrame};
