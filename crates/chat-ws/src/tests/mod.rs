//! WebSocket server integration tests.

mod fan_out;
mod lifecycle;

use std::sync::Arc;
use std::time::Duration;

use chat_presence::PresenceStore;
use chat_rooms::{Client, ClientEvent, RoomDispatcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;

use crate::server::{WsServer, WsServerConfig};

pub struct TestServer {
    pub server: Arc<WsServer>,
    pub addr: std::net::SocketAddr,
    pub presence: Arc<PresenceStore<Client>>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

pub async fn start_server(allowed_origins: Option<Vec<String>>) -> TestServer {
    let presence = Arc::new(PresenceStore::new());
    let (dispatcher, events) = RoomDispatcher::new();
    let config = WsServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        allowed_origins,
    };
    let server = Arc::new(WsServer::new(config, presence.clone(), dispatcher));
    let (listener, addr) = server.bind().await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.clone().run(listener, cancel.clone()));

    TestServer {
        server,
        addr,
        presence,
        events,
        cancel,
        handle,
    }
}

pub fn ws_request(
    addr: std::net::SocketAddr,
    headers: &[(&str, &str)],
) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    for (name, value) in headers {
        request.headers_mut().insert(
            tokio_tungstenite::tungstenite::http::header::HeaderName::try_from(*name).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    request
}

pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
