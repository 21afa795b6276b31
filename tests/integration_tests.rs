mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeServer, ServerOptions};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_pully::client::{ConnectError, EmitError, SocketClient, State};
use tokio_pully::config::{BackoffReconnect, Config, TokenPlacement};
use tokio_pully::errors::SessionError;
use tokio_pully::session::{OutboundMessage, Session};

fn config(server: &FakeServer) -> Config {
    Config::new()
        .with_server_url(server.http_url())
        .with_app_id("app1")
        .with_token("secret")
        .with_auto_connect(false)
        .with_read_timeout(Duration::from_secs(2))
}

/// Test handshake: upgrade url and auth payload
#[tokio::test]
async fn test_handshake_with_auth_payload() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();

    client.connect().await.unwrap();
    assert_eq!(client.state(), State::Connected);

    let handshake = server.next_handshake().await;
    assert_eq!(handshake.uri, "/socket.io/?EIO=4&transport=websocket");
    assert_eq!(handshake.token, None);

    assert_eq!(
        server.next_frame().await,
        r#"40/app1,{"appId":"/app1","token":"secret"}"#
    );

    client.disconnect().await;
    assert_eq!(client.state(), State::Disconnected);
}

/// Test token sent as a header on the upgrade request
#[tokio::test]
async fn test_handshake_with_header_token() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client =
        SocketClient::new(&config(&server).with_token_placement(TokenPlacement::Header)).unwrap();

    client.connect().await.unwrap();

    let handshake = server.next_handshake().await;
    assert_eq!(handshake.token.as_deref(), Some("secret"));
    assert_eq!(server.next_frame().await, r#"40/app1,{"appId":"/app1"}"#);

    client.disconnect().await;
}

/// Test connect callbacks fire in order
#[tokio::test]
async fn test_state_callbacks() {
    let server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connecting = tx.clone();
    client.on_connecting(move || {
        let _ = connecting.send("connecting");
    });
    let connected = tx.clone();
    client.on_connected(move || {
        let _ = connected.send("connected");
    });
    client.on_disconnected(move || {
        let _ = tx.send("disconnected");
    });

    client.connect().await.unwrap();
    client.disconnect().await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events, vec!["connecting", "connected", "disconnected"]);
}

/// Test session frames on the wire
#[tokio::test]
async fn test_subscribe_and_send_frames() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    let session = Session::with_transport(&config(&server), Arc::new(client)).unwrap();

    session.connect().await.unwrap();
    server.next_frame().await;

    let room = session.subscribe("room1").unwrap();
    assert_eq!(
        server.next_frame().await,
        r#"42/app1,["subscribe",{"channel":"room1"}]"#
    );

    let _ = room
        .send_message(OutboundMessage::new(json!({"text": "hi"})))
        .unwrap();
    assert_eq!(
        server.next_frame().await,
        r#"42/app1,["send_message",{"channelName":"room1","message":{"text":"hi"}}]"#
    );

    room.unsubscribe().unwrap();
    assert_eq!(
        server.next_frame().await,
        r#"42/app1,["unsubscribe",{"channel":"room1"}]"#
    );

    session.disconnect().await;
    assert_eq!(server.next_frame().await, "41/app1,");
}

/// Test emits made while connecting are flushed in order
#[tokio::test]
async fn test_emits_buffered_while_connecting() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    let session = Session::with_transport(&config(&server), Arc::new(client)).unwrap();

    let connecting = session.connect();
    assert_eq!(session.state(), State::Connecting);
    session.subscribe("early").unwrap();
    connecting.await.unwrap();

    assert!(server.next_frame().await.starts_with("40/app1,"));
    assert_eq!(
        server.next_frame().await,
        r#"42/app1,["subscribe",{"channel":"early"}]"#
    );
}

/// Test acknowledged send
#[tokio::test]
async fn test_send_with_ack() {
    let mut server = FakeServer::start(ServerOptions {
        ack: true,
        ..Default::default()
    })
    .await;
    let client = SocketClient::new(&config(&server)).unwrap();
    let session = Session::with_transport(&config(&server), Arc::new(client)).unwrap();
    session.connect().await.unwrap();
    server.next_frame().await;

    let sent = session
        .send_message(
            "room1",
            OutboundMessage::new(json!("hi")).with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
    assert_eq!(sent.await, Ok(Some(json!({"ok": true}))));
    assert_eq!(
        server.next_frame().await,
        r#"42/app1,0["send_message",{"channelName":"room1","message":"hi"}]"#
    );
}

/// Test acknowledged send without a reply times out
#[tokio::test]
async fn test_send_ack_timeout() {
    let server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    client.connect().await.unwrap();

    let result = client
        .emit_with_ack("send_message", json!({}), Duration::from_millis(200))
        .await;
    assert_eq!(result, Err(EmitError::Timeout));
}

/// Test pending acks fail when the client disconnects
#[tokio::test]
async fn test_pending_ack_closed_on_disconnect() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    client.connect().await.unwrap();
    server.next_frame().await;

    let pending = client.emit_with_ack("send_message", json!({}), Duration::from_secs(5));
    server.next_frame().await;
    client.disconnect().await;

    assert_eq!(pending.await, Err(EmitError::Closed));
}

/// Test server events reach listeners
#[tokio::test]
async fn test_server_events_reach_listeners() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    let session = Session::with_transport(&config(&server), Arc::new(client)).unwrap();
    session.connect().await.unwrap();
    server.next_frame().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let room = session.subscribe("room1").unwrap();
    room.listen(move |data| {
        let _ = tx.send(data);
    })
    .unwrap();
    server.next_frame().await;

    // other namespaces are ignored
    server.push(r#"42/other,["message","wrong"]"#);
    server.push(r#"42/app1,["message",{"channel":"room1","data":"x"}]"#);

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, json!({"channel": "room1", "data": "x"}));
    assert!(rx.try_recv().is_err());
}

/// Test listeners can call back into the session
#[tokio::test]
async fn test_listener_reentrancy() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    let session = Session::with_transport(&config(&server), Arc::new(client)).unwrap();
    session.connect().await.unwrap();
    server.next_frame().await;

    let echo = session.clone();
    session
        .listen_to("ping_me", move |data| {
            let _ = echo.send_message("echo", OutboundMessage::new(data));
        })
        .unwrap();

    server.push(r#"42/app1,["ping_me",7]"#);
    assert_eq!(
        server.next_frame().await,
        r#"42/app1,["send_message",{"channelName":"echo","message":7}]"#
    );
}

/// Test engine pings are answered
#[tokio::test]
async fn test_ping_pong() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    client.connect().await.unwrap();
    server.next_frame().await;

    server.push("2");
    assert_eq!(server.next_frame().await, "3");
}

/// Test rejected handshake
#[tokio::test]
async fn test_rejected_handshake() {
    let server = FakeServer::start(ServerOptions {
        reject: Some("invalid token".into()),
        ..Default::default()
    })
    .await;
    let client = SocketClient::new(&config(&server)).unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    let errors_clone = errors.clone();
    client.on_error(move |_| {
        errors_clone.fetch_add(1, Ordering::SeqCst);
    });
    let session = Session::with_transport(&config(&server), Arc::new(client)).unwrap();

    let result = session.connect().await;
    assert_eq!(result, Err(ConnectError::Rejected("invalid token".into())));
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(matches!(
        session.subscribe("room1"),
        Err(SessionError::NotConnected)
    ));
}

/// Test reconnection after the heartbeat expires
#[tokio::test]
async fn test_reconnect_after_heartbeat_timeout() {
    let mut server = FakeServer::start(ServerOptions {
        ping_interval: 100,
        ping_timeout: 100,
        ..Default::default()
    })
    .await;
    let client = SocketClient::new(&config(&server).with_reconnect_strategy(BackoffReconnect {
        factor: 1.0,
        min_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(50),
    }))
    .unwrap();

    let connects = Arc::new(AtomicUsize::new(0));
    let connects_clone = connects.clone();
    client.on_connected(move || {
        connects_clone.fetch_add(1, Ordering::SeqCst);
    });

    client.connect().await.unwrap();
    server.next_handshake().await;

    // no pings from the server, the client gives up after 200ms and reconnects
    server.next_handshake().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while connects.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    client.disconnect().await;
    assert_eq!(client.state(), State::Disconnected);
}

/// Test connecting to a closed port keeps retrying until disconnect
#[tokio::test]
async fn test_connect_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = Config::new()
        .with_server_url(format!("http://{}", addr))
        .with_auto_connect(false);
    let client = SocketClient::new(&config).unwrap();

    assert_eq!(client.connect().await, Err(ConnectError::Failed));
    assert_eq!(client.state(), State::Connecting);

    client.disconnect().await;
    assert_eq!(client.state(), State::Disconnected);
}

/// Test a second connect waits for the next attempt instead of reporting success
#[tokio::test]
async fn test_connect_while_connecting_waits_for_attempt() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = Config::new()
        .with_server_url(format!("http://{}", addr))
        .with_auto_connect(false)
        .with_reconnect_strategy(BackoffReconnect {
            factor: 1.0,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(50),
        });
    let session = Session::new(&config).unwrap();

    assert_eq!(session.connect().await, Err(ConnectError::Failed));
    assert_eq!(session.state(), State::Connecting);

    let second = tokio::time::timeout(Duration::from_secs(5), session.connect())
        .await
        .unwrap();
    assert_eq!(second, Err(ConnectError::Failed));
    assert_eq!(session.state(), State::Connecting);

    session.disconnect().await;
    assert_eq!(session.state(), State::Disconnected);
}

/// Test connect can be awaited after auto-connect already started the attempt
#[tokio::test]
async fn test_connect_after_auto_connect() {
    let server = FakeServer::start(ServerOptions::default()).await;
    let session = Session::new(&config(&server).with_auto_connect(true)).unwrap();
    assert_eq!(session.state(), State::Connecting);

    session.connect().await.unwrap();
    assert_eq!(session.state(), State::Connected);

    // already connected, resolves right away
    session.connect().await.unwrap();
    session.disconnect().await;
}

/// Test removed listeners no longer receive events
#[tokio::test]
async fn test_listener_removal() {
    let mut server = FakeServer::start(ServerOptions::default()).await;
    let client = SocketClient::new(&config(&server)).unwrap();
    client.connect().await.unwrap();
    server.next_frame().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let removed_tx = tx.clone();
    let removed = client.on("news", move |data| {
        let _ = removed_tx.send(("removed", data));
    });
    client.on("news", move |data| {
        let _ = tx.send(("kept", data));
    });
    client.off(removed);

    server.push(r#"42/app1,["news","first"]"#);
    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, ("kept", json!("first")));
    assert!(rx.try_recv().is_err());

    client.disconnect().await;
}

/// Test the error callback can call back into the client
#[tokio::test]
async fn test_error_callback_can_query_client() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = Config::new()
        .with_server_url(format!("http://{}", addr))
        .with_auto_connect(false);
    let client = SocketClient::new(&config).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = client.clone();
    client.on_error(move |_| {
        let _ = tx.send(observer.state());
    });

    assert_eq!(client.connect().await, Err(ConnectError::Failed));
    let state = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, State::Connecting);

    client.disconnect().await;
}
