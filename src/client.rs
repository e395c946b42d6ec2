//! The frame relay client: samples a capture source on a timer, sends each
//! frame to the processing service, and shows the latest processed frame.
//!
//! DESIGN
//! ======
//! The client owns one [`Connection`] and one sampling [`Interval`] per
//! mount, bundled in a `Session` so they are created and released together.
//! All client work runs on whichever task drives it, either through
//! [`FrameRelayClient::run_until`] or by calling [`FrameRelayClient::tick`]
//! and [`FrameRelayClient::drain_events`] directly. Socket I/O lives in the
//! connection's driver task; the client only sees channels.
//!
//! LIFECYCLE
//! =========
//! `Unmounted → Mounting → Active → Unmounting → Unmounted`
//!
//! Mount never waits for the connection. Unmount stops the timer, closes the
//! connection, and clears the display; dropping the client does the same.

use std::future::Future;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::capture::CaptureSource;
use crate::config::RelayConfig;
use crate::connection::{
    Connection, ConnectionEvent, ConnectionStatus, PROCESSED_FRAME_EVENT, SendOutcome,
    WEBCAM_FRAME_EVENT,
};
use crate::display::{DisplayHandle, DisplaySurface, View};
use crate::frame::{FrameSample, ProcessedFrame};

/// Where a client is in its mount cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Unmounted,
    Mounting,
    Active,
    Unmounting,
}

/// Running counters, accumulated across mounts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Ticks processed while active.
    pub ticks: u64,
    /// Frames handed to the connection.
    pub frames_sent: u64,
    /// Ticks with no snapshot available.
    pub frames_skipped: u64,
    /// Frames dropped because the connection was not open or was behind.
    pub frames_dropped: u64,
    /// Processed frames accepted for display.
    pub frames_received: u64,
    /// Processed frames ignored as malformed.
    pub frames_rejected: u64,
    pub timer_starts: u64,
    pub timer_stops: u64,
}

/// Result of one sampling tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Sent,
    NoSnapshot,
    Dropped(SendOutcome),
    /// The client is not mounted.
    Inactive,
}

/// Opens connections for a client on mount.
pub trait Connector {
    fn connect(&self, config: &RelayConfig) -> Connection;
}

/// Connects to a Socket.IO server over websocket.
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketIoConnector;

impl Connector for SocketIoConnector {
    fn connect(&self, config: &RelayConfig) -> Connection {
        Connection::open(config)
    }
}

impl<F> Connector for F
where
    F: Fn(&RelayConfig) -> Connection,
{
    fn connect(&self, config: &RelayConfig) -> Connection {
        self(config)
    }
}

struct Session {
    connection: Connection,
    sampler: Interval,
    events_open: bool,
}

enum Step {
    Shutdown,
    Tick,
    Event(Option<ConnectionEvent>),
}

/// Streams snapshots from `C` to the processing service and displays what
/// comes back.
pub struct FrameRelayClient<C> {
    config: RelayConfig,
    capture: C,
    display: DisplaySurface,
    lifecycle: Lifecycle,
    session: Option<Session>,
    stats: RelayStats,
}

impl<C> FrameRelayClient<C> {
    #[must_use]
    pub fn new(config: RelayConfig, capture: C) -> Self {
        Self {
            config,
            capture,
            display: DisplaySurface::new(),
            lifecycle: Lifecycle::Unmounted,
            session: None,
            stats: RelayStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    #[must_use]
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    #[must_use]
    pub fn display(&self) -> &DisplaySurface {
        &self.display
    }

    /// Read handle for a renderer that wants change notifications.
    #[must_use]
    pub fn subscribe(&self) -> DisplayHandle {
        self.display.subscribe()
    }

    #[must_use]
    pub fn view(&self) -> View {
        self.display.view()
    }

    /// Status of the current connection; `Closed` when not mounted.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.session
            .as_ref()
            .map_or(ConnectionStatus::Closed, |s| s.connection.status())
    }

    /// Open the connection and start the sampling timer.
    ///
    /// Does not wait for the connection. Calling this while already mounted
    /// is a no-op. Must be called from within a Tokio runtime.
    pub fn mount(&mut self, connector: &impl Connector) {
        if self.lifecycle != Lifecycle::Unmounted {
            debug!(lifecycle = ?self.lifecycle, "frame relay already mounted");
            return;
        }
        self.lifecycle = Lifecycle::Mounting;

        let connection = connector.connect(&self.config);

        let period = self.config.sample_interval;
        let mut sampler = tokio::time::interval_at(Instant::now() + period, period);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.stats.timer_starts += 1;

        self.session = Some(Session {
            connection,
            sampler,
            events_open: true,
        });
        self.lifecycle = Lifecycle::Active;
        info!(
            endpoint = %self.config.endpoint,
            namespace = %self.config.namespace,
            interval_ms = period.as_millis(),
            "frame relay mounted"
        );
    }

    /// Stop the timer, close the connection, and clear the display.
    ///
    /// Safe to call at any time, any number of times.
    pub fn unmount(&mut self) {
        if self.lifecycle == Lifecycle::Unmounted && self.session.is_none() {
            return;
        }
        self.lifecycle = Lifecycle::Unmounting;
        self.release();
        self.display.clear();
        self.lifecycle = Lifecycle::Unmounted;
        info!(
            sent = self.stats.frames_sent,
            received = self.stats.frames_received,
            "frame relay unmounted"
        );
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            let Session {
                mut connection,
                sampler,
                ..
            } = session;
            drop(sampler);
            self.stats.timer_stops += 1;
            connection.close();
        }
    }

    /// Apply one inbound connection event.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { sid } => info!(%sid, "frame relay connected"),
            ConnectionEvent::Disconnected { reason } => {
                warn!(%reason, "frame relay disconnected");
            }
            ConnectionEvent::Message(message) if message.event == PROCESSED_FRAME_EVENT => {
                match ProcessedFrame::from_payload(&message.payload) {
                    Ok(frame) => {
                        self.stats.frames_received += 1;
                        self.display.present(frame);
                    }
                    Err(e) => {
                        self.stats.frames_rejected += 1;
                        warn!(error = %e, "ignoring malformed processed frame");
                    }
                }
            }
            ConnectionEvent::Message(message) => {
                debug!(event = %message.event, "ignoring unhandled event");
            }
        }
    }

    /// Apply every inbound event already buffered, without waiting.
    ///
    /// Returns how many events were handled.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self
            .session
            .as_mut()
            .and_then(|s| s.connection.try_next_event())
        {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }
}

impl<C: CaptureSource> FrameRelayClient<C> {
    /// Take one sample and send it, fire-and-forget.
    pub fn tick(&mut self) -> TickOutcome {
        if self.lifecycle != Lifecycle::Active {
            return TickOutcome::Inactive;
        }
        let Some(session) = self.session.as_ref() else {
            return TickOutcome::Inactive;
        };
        self.stats.ticks += 1;

        let Some(sample) = self
            .capture
            .try_snapshot()
            .and_then(|snapshot| FrameSample::from_snapshot(&snapshot))
        else {
            self.stats.frames_skipped += 1;
            return TickOutcome::NoSnapshot;
        };

        match session
            .connection
            .send(WEBCAM_FRAME_EVENT, sample.into_payload())
        {
            SendOutcome::Queued => {
                self.stats.frames_sent += 1;
                TickOutcome::Sent
            }
            dropped => {
                self.stats.frames_dropped += 1;
                TickOutcome::Dropped(dropped)
            }
        }
    }

    /// Drive ticks and inbound events until `shutdown` completes.
    ///
    /// Returns immediately when not mounted. Does not unmount.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };

            let step = tokio::select! {
                () = &mut shutdown => Step::Shutdown,
                _ = session.sampler.tick() => Step::Tick,
                event = session.connection.next_event(), if session.events_open => {
                    Step::Event(event)
                }
            };

            match step {
                Step::Shutdown => return,
                Step::Tick => {
                    self.tick();
                }
                Step::Event(Some(event)) => self.handle_event(event),
                Step::Event(None) => {
                    warn!("frame relay connection driver stopped");
                    if let Some(session) = self.session.as_mut() {
                        session.events_open = false;
                    }
                }
            }
        }
    }
}

impl<C> Drop for FrameRelayClient<C> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
