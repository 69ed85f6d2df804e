//! End-to-end tests over real WebSockets.
//!
//! Each test starts a real server on a free port and connects real
//! clients, exercising the INIT handshake, the windowed DIFF fan-out, and
//! connection fault isolation.

use checksync::client::{SyncClient, SyncEvent};
use checksync::server::{ServerConfig, SyncServer};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio::time::{timeout, Duration};

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port.
async fn start_test_server(num_of_checkboxes: usize, broadcast_diff_window_ms: u64) -> u16 {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        num_of_checkboxes,
        broadcast_diff_window_ms,
        frame_buffer: 64,
    };
    let server = SyncServer::new(config);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Connect a client and drain its Connected + InitialState events,
/// returning the event receiver and the initial cell array.
async fn connect_client(url: &str) -> (SyncClient, mpsc::Receiver<SyncEvent>, Vec<u8>) {
    let mut client = SyncClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();

    match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
        Some(SyncEvent::Connected) => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    let initial = match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
        Some(SyncEvent::InitialState(cells)) => cells,
        other => panic!("expected InitialState, got {other:?}"),
    };
    (client, events, initial)
}

/// Await the next DIFF event, skipping anything else.
async fn next_diff(events: &mut mpsc::Receiver<SyncEvent>) -> (bool, Vec<u32>) {
    loop {
        match timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("diff within timeout")
        {
            Some(SyncEvent::Diff { value, indices }) => return (value, indices),
            Some(_) => continue,
            None => panic!("event channel closed while waiting for diff"),
        }
    }
}

#[tokio::test]
async fn test_init_frame_bytes_for_ten_zero_cells() {
    let port = start_test_server(10, 1_000).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (_, mut reader) = ws.split();

    let msg = timeout(Duration::from_secs(2), reader.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let bytes: Vec<u8> = match msg {
        Message::Binary(data) => data.into(),
        other => panic!("expected binary frame, got {other:?}"),
    };
    // header (0 << 5) | (6 << 2) | 0, then two zero body bytes
    assert_eq!(bytes, vec![0x18, 0x00, 0x00]);
}

#[tokio::test]
async fn test_client_receives_initial_state() {
    let port = start_test_server(10, 1_000).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (_client, _events, initial) = connect_client(&url).await;
    assert_eq!(initial, vec![0u8; 10]);
}

#[tokio::test]
async fn test_toggle_fans_out_diff_to_all_clients() {
    let port = start_test_server(8, 100).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client1, mut events1, _) = connect_client(&url).await;
    let (_client2, mut events2, _) = connect_client(&url).await;

    client1.send_toggle(3, true).await.unwrap();

    // Both connections receive the batched diff, the originator included.
    let (value, indices) = next_diff(&mut events2).await;
    assert!(value);
    assert_eq!(indices, vec![3]);

    let (value, indices) = next_diff(&mut events1).await;
    assert!(value);
    assert_eq!(indices, vec![3]);
}

#[tokio::test]
async fn test_on_then_off_within_window_is_silent() {
    let port = start_test_server(8, 300).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client, mut events, _) = connect_client(&url).await;

    client.send_toggle(5, true).await.unwrap();
    client.send_toggle(5, false).await.unwrap();

    // Watch two full windows: no diff may reference cell 5.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(700);
    while let Ok(event) = timeout(Duration::from_millis(100), events.recv()).await {
        if let Some(SyncEvent::Diff { indices, .. }) = event {
            assert!(!indices.contains(&5), "coalesced toggle leaked a diff");
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }
}

#[tokio::test]
async fn test_late_joiner_sees_toggled_state_in_init() {
    let port = start_test_server(16, 1_000).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client1, _events1, _) = connect_client(&url).await;
    client1.send_toggle(2, true).await.unwrap();
    // The store is mutated on receipt, before any diff window elapses.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_client2, _events2, initial) = connect_client(&url).await;
    assert_eq!(initial[2], 1);
    assert_eq!(initial.iter().filter(|&&c| c == 1).count(), 1);
}

#[tokio::test]
async fn test_malformed_frame_faults_only_that_connection() {
    let port = start_test_server(8, 100).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (bad_client, mut bad_events, _) = connect_client(&url).await;
    let (good_client, mut good_events, _) = connect_client(&url).await;

    // Unknown client type code 5: the server closes this connection.
    bad_client
        .send_raw(vec![5 << 5, 0x00, 0x00, 0x00])
        .await
        .unwrap();

    let disconnected = loop {
        match timeout(Duration::from_secs(2), bad_events.recv()).await {
            Ok(Some(SyncEvent::Disconnected)) | Ok(None) => break true,
            Ok(Some(_)) => continue,
            Err(_) => break false,
        }
    };
    assert!(disconnected, "faulted connection should be closed");

    // The other connection is unaffected and still receives diffs.
    good_client.send_toggle(1, true).await.unwrap();
    let (value, indices) = next_diff(&mut good_events).await;
    assert!(value);
    assert_eq!(indices, vec![1]);
}

#[tokio::test]
async fn test_out_of_range_toggle_faults_connection() {
    let port = start_test_server(8, 100).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client, mut events, _) = connect_client(&url).await;
    client.send_toggle(8, true).await.unwrap();

    let disconnected = loop {
        match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(SyncEvent::Disconnected)) | Ok(None) => break true,
            Ok(Some(_)) => continue,
            Err(_) => break false,
        }
    };
    assert!(disconnected, "out-of-range toggle should close the connection");
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let port = free_port().await;
    let server = SyncServer::new(ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        num_of_checkboxes: 8,
        broadcast_diff_window_ms: 100,
        frame_buffer: 16,
    });
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(async move { server.run().await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    shutdown.shutdown();
    timeout(Duration::from_secs(2), task)
        .await
        .expect("server exits after shutdown")
        .unwrap();
}
