//! Connect, disconnect, rejection and shutdown behavior.

use std::time::Duration;

use chat_rooms::ClientEvent;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{start_server, wait_until, ws_request};

#[tokio::test]
async fn connect_registers_presence_and_emits_events() {
    let mut ts = start_server(None).await;

    let (mut ws, _) = connect_async(ws_request(ts.addr, &[("Cookie", "userId=u1")]))
        .await
        .unwrap();

    let presence = ts.presence.clone();
    wait_until("session registered", move || presence.len() == 1).await;
    assert_eq!(ts.server.connection_count(), 1);

    let connected = tokio::time::timeout(Duration::from_secs(2), ts.events.recv())
        .await
        .unwrap()
        .unwrap();
    let client = match connected {
        ClientEvent::Connected(c) => c,
        other => panic!("expected Connected, got {other:?}"),
    };
    assert_eq!(client.user_id(), &"u1".into());
    assert!(client.client_id().as_str().starts_with("u1-"));

    // Remote close: presence empties and exactly one Disconnected fires.
    ws.close(None).await.unwrap();

    let disconnected = tokio::time::timeout(Duration::from_secs(2), ts.events.recv())
        .await
        .unwrap()
        .unwrap();
    match disconnected {
        ClientEvent::Disconnected(c) => assert_eq!(c.client_id(), client.client_id()),
        other => panic!("expected Disconnected, got {other:?}"),
    }

    let presence = ts.presence.clone();
    wait_until("session removed", move || presence.is_empty()).await;

    // Exactly once: no further events.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), ts.events.recv())
            .await
            .is_err()
    );

    ts.cancel.cancel();
    ts.handle.await.unwrap();
}

#[tokio::test]
async fn abrupt_peer_drop_runs_the_same_cleanup_once() {
    let mut ts = start_server(None).await;

    let (ws, _) = connect_async(ws_request(ts.addr, &[("Cookie", "userId=u1")]))
        .await
        .unwrap();

    let presence = ts.presence.clone();
    wait_until("session registered", move || presence.len() == 1).await;
    let _ = ts.events.recv().await; // Connected

    drop(ws);

    let presence = ts.presence.clone();
    wait_until("session removed after drop", move || presence.is_empty()).await;
    let disconnected = tokio::time::timeout(Duration::from_secs(2), ts.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(disconnected, ClientEvent::Disconnected(_)));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), ts.events.recv())
            .await
            .is_err(),
        "disconnect must fire exactly once"
    );

    ts.cancel.cancel();
    ts.handle.await.unwrap();
}

#[tokio::test]
async fn missing_subject_is_rejected_before_upgrade() {
    let ts = start_server(None).await;

    let err = connect_async(ws_request(ts.addr, &[]))
        .await
        .expect_err("upgrade must be rejected");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert!(ts.presence.is_empty());

    ts.cancel.cancel();
    ts.handle.await.unwrap();
}

#[tokio::test]
async fn unlisted_origin_is_rejected_with_403() {
    let ts = start_server(Some(vec!["https://chat.example".to_string()])).await;

    let err = connect_async(ws_request(
        ts.addr,
        &[("Cookie", "userId=u1"), ("Origin", "https://evil.example")],
    ))
    .await
    .expect_err("upgrade must be rejected");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    // A listed origin passes.
    let (mut ws, _) = connect_async(ws_request(
        ts.addr,
        &[("Cookie", "userId=u1"), ("Origin", "https://chat.example")],
    ))
    .await
    .unwrap();
    ws.close(None).await.unwrap();

    ts.cancel.cancel();
    ts.handle.await.unwrap();
}

#[tokio::test]
async fn wrong_path_is_rejected() {
    let ts = start_server(None).await;

    let mut request = ws_request(ts.addr, &[("Cookie", "userId=u1")]);
    *request.uri_mut() = format!("ws://{}/other", ts.addr).parse().unwrap();

    let err = connect_async(request).await.expect_err("wrong path");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    ts.cancel.cancel();
    ts.handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_clients_with_going_away() {
    let ts = start_server(None).await;

    let (mut ws, _) = connect_async(ws_request(ts.addr, &[("Cookie", "userId=u1")]))
        .await
        .unwrap();
    let presence = ts.presence.clone();
    wait_until("session registered", move || presence.len() == 1).await;

    ts.cancel.cancel();

    let frame = loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
        {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    assert_eq!(frame.unwrap().code, CloseCode::Away);

    ts.handle.await.unwrap();
    assert!(ts.presence.is_empty());
}
