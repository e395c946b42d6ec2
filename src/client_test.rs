use super::*;
use crate::connection::{Link, WireMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Hands out in-memory connections and keeps their driver sides.
#[derive(Default)]
struct Loopback {
    links: Mutex<Vec<Link>>,
}

impl Loopback {
    fn take_link(&self) -> Link {
        self.links
            .lock()
            .expect("loopback mutex should lock")
            .pop()
            .expect("a connection should have been opened")
    }

    fn opened(&self) -> usize {
        self.links.lock().expect("loopback mutex should lock").len()
    }
}

impl Connector for Loopback {
    fn connect(&self, config: &RelayConfig) -> Connection {
        let (connection, link) =
            Connection::channel(config.outbound_capacity, config.inbound_capacity);
        self.links
            .lock()
            .expect("loopback mutex should lock")
            .push(link);
        connection
    }
}

fn fixed(snapshot: &'static str) -> impl FnMut() -> Option<String> {
    move || Some(snapshot.to_owned())
}

fn processed(payload: &str) -> ConnectionEvent {
    ConnectionEvent::Message(WireMessage::new(PROCESSED_FRAME_EVENT, payload))
}

#[tokio::test]
async fn new_client_is_unmounted_and_inert() {
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));
    assert_eq!(client.lifecycle(), Lifecycle::Unmounted);
    assert_eq!(client.tick(), TickOutcome::Inactive);
    assert_eq!(client.connection_status(), ConnectionStatus::Closed);
    assert_eq!(client.stats(), RelayStats::default());
}

#[tokio::test]
async fn mount_is_active_without_waiting_for_connection() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));

    client.mount(&loopback);
    assert_eq!(client.lifecycle(), Lifecycle::Active);
    assert_eq!(client.connection_status(), ConnectionStatus::Connecting);
    assert_eq!(client.stats().timer_starts, 1);

    // Not connected yet: the frame is dropped, not queued.
    assert_eq!(
        client.tick(),
        TickOutcome::Dropped(SendOutcome::NotOpen)
    );
    let mut link = loopback.take_link();
    assert!(link.outbound.try_recv().is_err());
}

#[tokio::test]
async fn mounting_twice_keeps_one_connection_and_timer() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));

    client.mount(&loopback);
    client.mount(&loopback);

    assert_eq!(loopback.opened(), 1);
    assert_eq!(client.stats().timer_starts, 1);
}

#[tokio::test]
async fn only_ticks_with_a_snapshot_send_and_headers_are_stripped() {
    let loopback = Loopback::default();
    let mut calls = 0;
    let alternating = move || {
        calls += 1;
        (calls % 2 == 1).then(|| "data:image/jpeg;base64,AAAA".to_owned())
    };
    let mut client = FrameRelayClient::new(RelayConfig::default(), alternating);
    client.mount(&loopback);
    let mut link = loopback.take_link();
    link.status.send_replace(ConnectionStatus::Connected);

    let mut sent = Vec::new();
    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(client.tick());
        while let Ok(message) = link.outbound.try_recv() {
            sent.push(message);
        }
    }

    assert_eq!(
        outcomes,
        [
            TickOutcome::Sent,
            TickOutcome::NoSnapshot,
            TickOutcome::Sent,
            TickOutcome::NoSnapshot,
            TickOutcome::Sent,
            TickOutcome::NoSnapshot,
        ]
    );
    assert_eq!(sent, vec![WireMessage::new(WEBCAM_FRAME_EVENT, "AAAA"); 3]);

    let stats = client.stats();
    assert_eq!(stats.ticks, 6);
    assert_eq!(stats.frames_sent, 3);
    assert_eq!(stats.frames_skipped, 3);
}

#[tokio::test]
async fn blank_snapshot_counts_as_no_snapshot() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("data:image/jpeg;base64,"));
    client.mount(&loopback);
    let link = loopback.take_link();
    link.status.send_replace(ConnectionStatus::Connected);

    assert_eq!(client.tick(), TickOutcome::NoSnapshot);
}

#[tokio::test]
async fn last_processed_frame_wins() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));
    client.mount(&loopback);
    let link = loopback.take_link();

    link.events.try_send(processed("M1M1")).expect("buffer M1");
    link.events.try_send(processed("M2M2")).expect("buffer M2");
    assert_eq!(client.drain_events(), 2);

    assert_eq!(
        client.view(),
        View::Overlay("data:image/jpeg;base64,M2M2".to_owned())
    );
    assert_eq!(client.stats().frames_received, 2);
}

#[tokio::test]
async fn no_overlay_until_a_frame_arrives() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));
    client.mount(&loopback);
    let link = loopback.take_link();

    assert_eq!(client.view(), View::Preview);

    link.events
        .try_send(ConnectionEvent::Connected { sid: "s1".into() })
        .expect("buffer connected");
    link.events
        .try_send(ConnectionEvent::Message(WireMessage::new("status", "ready")))
        .expect("buffer other event");
    assert_eq!(client.drain_events(), 2);
    assert_eq!(client.view(), View::Preview);
}

#[tokio::test]
async fn malformed_frame_keeps_previous_display() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));
    client.mount(&loopback);
    let link = loopback.take_link();

    link.events.try_send(processed("GOOD")).expect("buffer good");
    link.events.try_send(processed("not base64!")).expect("buffer bad");
    link.events.try_send(processed("")).expect("buffer empty");
    client.drain_events();

    assert_eq!(
        client.view(),
        View::Overlay("data:image/jpeg;base64,GOOD".to_owned())
    );
    assert_eq!(client.stats().frames_received, 1);
    assert_eq!(client.stats().frames_rejected, 2);
}

#[tokio::test]
async fn mount_unmount_cycles_balance_timers() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));

    for cycle in 1..=3 {
        client.mount(&loopback);
        client.tick();
        client.unmount();
        client.unmount();

        let stats = client.stats();
        assert_eq!(stats.timer_starts, cycle);
        assert_eq!(stats.timer_stops, cycle);
        assert_eq!(stats.ticks, cycle);
        assert_eq!(client.lifecycle(), Lifecycle::Unmounted);

        let mut link = loopback.take_link();
        assert!(link.shutdown.try_recv().is_ok(), "connection should close");
    }

    assert_eq!(client.tick(), TickOutcome::Inactive);
    assert_eq!(client.stats().ticks, 3);
}

#[tokio::test]
async fn unmount_clears_display_and_closes_connection() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));
    client.mount(&loopback);
    let mut link = loopback.take_link();
    link.events.try_send(processed("BBBB")).expect("buffer frame");
    client.drain_events();

    client.unmount();

    assert_eq!(client.view(), View::Preview);
    assert_eq!(client.connection_status(), ConnectionStatus::Closed);
    assert!(link.shutdown.try_recv().is_ok());
}

#[tokio::test]
async fn dropping_a_mounted_client_closes_connection() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));
    client.mount(&loopback);
    let mut link = loopback.take_link();

    drop(client);
    assert!(link.shutdown.try_recv().is_ok());
}

#[tokio::test(start_paused = true)]
async fn run_until_ticks_on_the_sampling_interval() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), || None::<String>);
    client.mount(&loopback);

    client
        .run_until(tokio::time::sleep(Duration::from_millis(1_050)))
        .await;

    assert_eq!(client.stats().ticks, 10);
    assert_eq!(client.stats().frames_skipped, 10);

    client.unmount();
    client
        .run_until(tokio::time::sleep(Duration::from_millis(500)))
        .await;
    assert_eq!(client.stats().ticks, 10);
}

#[tokio::test(start_paused = true)]
async fn run_until_applies_inbound_frames() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));
    client.mount(&loopback);
    let link = loopback.take_link();

    link.events.try_send(processed("BBBB")).expect("buffer frame");
    drop(link);

    client
        .run_until(tokio::time::sleep(Duration::from_millis(250)))
        .await;

    assert_eq!(
        client.view(),
        View::Overlay("data:image/jpeg;base64,BBBB".to_owned())
    );
    // Driver gone before connecting: ticks keep running, sends drop as not open.
    assert_eq!(client.stats().ticks, 2);
    assert_eq!(client.stats().frames_dropped, 2);
    assert_eq!(
        client.tick(),
        TickOutcome::Dropped(SendOutcome::NotOpen)
    );
}

#[tokio::test]
async fn unmount_while_connecting_is_clean_and_repeatable() {
    // Accepts TCP (kernel backlog) but never completes the websocket upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let config = RelayConfig {
        endpoint: format!("http://{}", listener.local_addr().expect("local addr")),
        ..RelayConfig::default()
    };
    let mut client = FrameRelayClient::new(config, fixed("AAAA"));

    for _ in 0..2 {
        client.mount(&SocketIoConnector);
        assert_eq!(
            client.tick(),
            TickOutcome::Dropped(SendOutcome::NotOpen)
        );
        client.unmount();
        assert_eq!(client.lifecycle(), Lifecycle::Unmounted);
    }

    let stats = client.stats();
    assert_eq!(stats.timer_starts, 2);
    assert_eq!(stats.timer_stops, 2);
}

#[tokio::test]
async fn closure_connector_is_used_on_mount() {
    let kept = Mutex::new(Vec::new());
    let connector = |config: &RelayConfig| {
        let (connection, link) =
            Connection::channel(config.outbound_capacity, config.inbound_capacity);
        link.status.send_replace(ConnectionStatus::Connected);
        kept.lock().expect("kept mutex should lock").push(link);
        connection
    };
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));

    client.mount(&connector);
    assert_eq!(client.connection_status(), ConnectionStatus::Connected);
    assert_eq!(client.tick(), TickOutcome::Sent);
    assert_eq!(kept.lock().expect("kept mutex should lock").len(), 1);
}

#[tokio::test]
async fn end_to_end_frame_round_trip() {
    let loopback = Loopback::default();
    let mut client = FrameRelayClient::new(RelayConfig::default(), fixed("AAAA"));

    client.mount(&loopback);
    let mut link = loopback.take_link();
    link.status.send_replace(ConnectionStatus::Connected);
    link.events
        .try_send(ConnectionEvent::Connected { sid: "s1".into() })
        .expect("buffer connected");
    client.drain_events();

    assert_eq!(client.tick(), TickOutcome::Sent);
    assert_eq!(
        link.outbound.try_recv().expect("outbound frame"),
        WireMessage::new(WEBCAM_FRAME_EVENT, "AAAA")
    );

    link.events.try_send(processed("BBBB")).expect("buffer frame");
    client.drain_events();
    assert_eq!(
        client.view(),
        View::Overlay("data:image/jpeg;base64,BBBB".to_owned())
    );

    client.unmount();
    assert_eq!(client.stats().timer_stops, 1);
    assert!(link.shutdown.try_recv().is_ok());
    assert_eq!(client.tick(), TickOutcome::Inactive);
}

#[tokio::test]
async fn end_to_end_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let config = RelayConfig {
        endpoint: format!("http://{}", listener.local_addr().expect("local addr")),
        sample_interval: Duration::from_millis(20),
        ..RelayConfig::default()
    };

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept tcp");
        let mut ws = accept_async(tcp).await.expect("websocket handshake");
        let open = r#"0{"sid":"e1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
        ws.send(Message::Text(open.to_owned().into())).await.expect("send open");

        let mut received = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let text = text.as_str().to_owned();
            if text == "40" {
                ws.send(Message::Text(r#"40{"sid":"s1"}"#.to_owned().into()))
                    .await
                    .expect("send connect ack");
            } else if text.starts_with("42") {
                received.push(text);
                ws.send(Message::Text(r#"42["processed_frame","BBBB"]"#.to_owned().into()))
                    .await
                    .expect("send processed frame");
                break;
            }
        }
        received
    });

    let mut client = FrameRelayClient::new(config, fixed("data:image/jpeg;base64,AAAA"));
    client.mount(&SocketIoConnector);

    let mut handle = client.subscribe();
    client
        .run_until(async move {
            let _ = timeout(Duration::from_secs(3), handle.changed()).await;
        })
        .await;

    assert_eq!(
        client.view(),
        View::Overlay("data:image/jpeg;base64,BBBB".to_owned())
    );
    client.unmount();

    let received = server.await.expect("server task");
    assert_eq!(received, vec![r#"42["webcam_frame","AAAA"]"#.to_owned()]);
}
