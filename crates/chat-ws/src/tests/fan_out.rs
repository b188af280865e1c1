//! End-to-end fan-out: log record in, text frames out.

use std::sync::Arc;
use std::time::Duration;

use chat_authz::StaticAuthz;
use chat_core::Message;
use chat_event_log::{Event, LogProducer, MemoryLog, NewLogRecord};
use chat_rooms::{run_client_events, RoomServer, ShardedWriter};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::{start_server, wait_until, ws_request};
use crate::authorizer::WsAuthorizer;
use crate::server::CLOSE_INTERNAL_ERROR;
use crate::watcher::run_watcher;

async fn append_inserted(log: &MemoryLog, msg: &Message) {
    let event = Event::inserted(msg.clone());
    log.producer()
        .append(NewLogRecord {
            key: event.topic_id().to_string(),
            event_type: event.event_type().as_str().to_string(),
            payload: event.encode().unwrap(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn both_sockets_of_a_user_receive_the_message_once() {
    let mut ts = start_server(None).await;

    let oracle = StaticAuthz::new();
    oracle.allow("u1", "watch", "t");
    let room_server = Arc::new(RoomServer::new(
        ts.presence.clone(),
        WsAuthorizer::new(oracle),
        ShardedWriter::new(2),
    ));

    let cancel = CancellationToken::new();
    let events = std::mem::replace(&mut ts.events, tokio::sync::mpsc::unbounded_channel().1);
    let ws_server = ts.server.clone();
    let reconciler = tokio::spawn(run_client_events(
        room_server.clone(),
        events,
        cancel.clone(),
        move |client, _error| {
            let server = ws_server.clone();
            let client_id = client.client_id().clone();
            tokio::spawn(async move {
                server
                    .close_client(&client_id, CLOSE_INTERNAL_ERROR, "internal error")
                    .await;
            });
        },
    ));

    let log = MemoryLog::new();
    let watcher = tokio::spawn(run_watcher(
        log.consumer("watcher"),
        room_server.clone(),
        cancel.clone(),
    ));

    // Two devices for the same user.
    let (mut ws_a, _) = connect_async(ws_request(ts.addr, &[("Cookie", "userId=u1")]))
        .await
        .unwrap();
    let (mut ws_b, _) = connect_async(ws_request(ts.addr, &[("Cookie", "userId=u1")]))
        .await
        .unwrap();
    let presence = ts.presence.clone();
    wait_until("both sessions registered", move || presence.len() == 2).await;

    let msg = Message::new("sender".into(), "t".into(), "hello there");
    append_inserted(&log, &msg).await;

    let expected = serde_json::to_string(&msg).unwrap();
    for ws in [&mut ws_a, &mut ws_b] {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message delivered")
            .unwrap()
            .unwrap();
        match frame {
            WsMessage::Text(text) => assert_eq!(text, expected),
            other => panic!("expected text frame, got {other:?}"),
        }

        // Exactly once per socket.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), ws.next())
                .await
                .is_err()
        );
    }

    cancel.cancel();
    ts.cancel.cancel();
    let _ = watcher.await;
    let _ = reconciler.await;
    ts.handle.await.unwrap();
}

#[tokio::test]
async fn unauthorized_users_receive_nothing() {
    let mut ts = start_server(None).await;

    let oracle = StaticAuthz::new();
    oracle.allow("watcher-user", "watch", "t");
    let room_server = Arc::new(RoomServer::new(
        ts.presence.clone(),
        WsAuthorizer::new(oracle),
        ShardedWriter::new(2),
    ));

    let cancel = CancellationToken::new();
    let events = std::mem::replace(&mut ts.events, tokio::sync::mpsc::unbounded_channel().1);
    let reconciler = tokio::spawn(run_client_events(
        room_server.clone(),
        events,
        cancel.clone(),
        |_client, _error| {},
    ));

    let log = MemoryLog::new();
    let watcher = tokio::spawn(run_watcher(
        log.consumer("watcher"),
        room_server.clone(),
        cancel.clone(),
    ));

    let (mut ws, _) = connect_async(ws_request(ts.addr, &[("Cookie", "userId=stranger")]))
        .await
        .unwrap();
    let presence = ts.presence.clone();
    wait_until("session registered", move || presence.len() == 1).await;

    let msg = Message::new("sender".into(), "t".into(), "secret");
    append_inserted(&log, &msg).await;

    // The room exists and the message flowed, but not to this socket.
    wait_until("room created by delivery", {
        let room_server = room_server.clone();
        move || room_server.room(&"t".into()).is_some()
    })
    .await;
    assert!(
        tokio::time::timeout(Duration::from_millis(300), ws.next())
            .await
            .is_err(),
        "stranger must not receive the message"
    );

    cancel.cancel();
    ts.cancel.cancel();
    let _ = watcher.await;
    let _ = reconciler.await;
    ts.handle.await.unwrap();
}

#[tokio::test]
async fn deletes_are_not_broadcast() {
    let mut ts = start_server(None).await;

    let oracle = StaticAuthz::new();
    oracle.allow("u1", "watch", "t");
    let room_server = Arc::new(RoomServer::new(
        ts.presence.clone(),
        WsAuthorizer::new(oracle),
        ShardedWriter::new(2),
    ));

    let cancel = CancellationToken::new();
    let events = std::mem::replace(&mut ts.events, tokio::sync::mpsc::unbounded_channel().1);
    let reconciler = tokio::spawn(run_client_events(
        room_server.clone(),
        events,
        cancel.clone(),
        |_client, _error| {},
    ));

    let log = MemoryLog::new();
    let watcher = tokio::spawn(run_watcher(
        log.consumer("watcher"),
        room_server.clone(),
        cancel.clone(),
    ));

    let (mut ws, _) = connect_async(ws_request(ts.addr, &[("Cookie", "userId=u1")]))
        .await
        .unwrap();
    let presence = ts.presence.clone();
    wait_until("session registered", move || presence.len() == 1).await;

    let msg = Message::new("sender".into(), "t".into(), "hello");
    let delete = Event::deleted(&msg);
    log.producer()
        .append(NewLogRecord {
            key: delete.topic_id().to_string(),
            event_type: delete.event_type().as_str().to_string(),
            payload: delete.encode().unwrap(),
        })
        .await
        .unwrap();
    append_inserted(&log, &msg).await;

    // Only the insert arrives.
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        WsMessage::Text(text) => assert_eq!(text, serde_json::to_string(&msg).unwrap()),
        other => panic!("expected the inserted message, got {other:?}"),
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(200), ws.next())
            .await
            .is_err()
    );

    cancel.cancel();
    ts.cancel.cancel();
    let _ = watcher.await;
    let _ = reconciler.await;
    ts.handle.await.unwrap();
}
