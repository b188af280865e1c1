//! Socket accept, upgrade, lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chat_core::{ClientId, UserId};
use chat_presence::PresenceStore;
use chat_rooms::{Client, ClientEvent, RoomDispatcher};
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conn::WsConn;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server is going away (shutdown, write failure).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Authorization-class closures.
pub const CLOSE_POLICY: u16 = 1008;
/// Internal server error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

const WS_PATH: &str = "/ws";

/// WebSocket endpoint configuration.
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    pub bind_addr: String,
    /// `None` disables the origin check; `Some(list)` rejects any non-empty
    /// `Origin` not in the list before the upgrade.
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7100".to_string(),
            allowed_origins: None,
        }
    }
}

/// Owns the listener, the live-connection registry, and the connect path.
pub struct WsServer {
    config: WsServerConfig,
    presence: Arc<PresenceStore<Client>>,
    dispatcher: RoomDispatcher,
    connections: Arc<Mutex<HashMap<ClientId, Arc<WsConn>>>>,
}

impl WsServer {
    pub fn new(
        config: WsServerConfig,
        presence: Arc<PresenceStore<Client>>,
        dispatcher: RoomDispatcher,
    ) -> Self {
        Self {
            config,
            presence,
            dispatcher,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Binds and returns the actual local address (useful with port 0).
    pub async fn bind(&self) -> std::io::Result<(TcpListener, std::net::SocketAddr)> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "websocket server listening");
        Ok((listener, addr))
    }

    /// Accept loop. On cancellation every live socket is closed with 1001
    /// before returning.
    pub async fn run(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "tcp connection accepted");
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_socket(stream).await });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }

        self.close_all(CLOSE_GOING_AWAY, "going away").await;
    }

    /// Closes one client with the given code. Used by the reconciliation
    /// error path (1011/1008) and by shutdown (1001). Idempotent.
    pub async fn close_client(&self, client_id: &ClientId, code: u16, reason: &str) {
        let conn = {
            let connections = self.connections.lock().unwrap();
            connections.get(client_id).cloned()
        };
        if let Some(conn) = conn {
            conn.close_and_cleanup(code, reason).await;
        }
    }

    async fn close_all(&self, code: u16, reason: &str) {
        let conns: Vec<Arc<WsConn>> = {
            let connections = self.connections.lock().unwrap();
            connections.values().cloned().collect()
        };
        for conn in conns {
            conn.close_and_cleanup(code, reason).await;
        }
    }

    /// Number of sockets currently registered.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    async fn handle_socket(&self, stream: TcpStream) {
        let allowed_origins = self.config.allowed_origins.clone();
        let mut subject: Option<UserId> = None;

        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().path() != WS_PATH {
                return Err(plain_response(StatusCode::NOT_FOUND));
            }
            if !origin_allowed(allowed_origins.as_deref(), req.headers()) {
                return Err(plain_response(StatusCode::FORBIDDEN));
            }
            match user_id_from_headers(req.headers()) {
                Some(user_id) => {
                    subject = Some(user_id);
                    Ok(resp)
                }
                None => Err(plain_response(StatusCode::UNAUTHORIZED)),
            }
        };

        let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(error = %e, "websocket upgrade rejected");
                return;
            }
        };
        let user_id = match subject {
            Some(user_id) => user_id,
            // The callback rejected but accept still returned a stream;
            // nothing to serve.
            None => return,
        };

        let client_id = ClientId::from(format!("{user_id}{}", random_client_suffix()));
        let (sink, mut source) = ws.split();
        let conn = Arc::new(WsConn::new(sink));
        let client = Client::new(client_id.clone(), user_id.clone(), conn.clone());

        // All disconnect triggers funnel through this hook, exactly once.
        {
            let presence = self.presence.clone();
            let dispatcher = self.dispatcher.clone();
            let connections = self.connections.clone();
            let client = client.clone();
            conn.set_cleanup(move || {
                presence.disconnect(&client);
                connections.lock().unwrap().remove(client.client_id());
                dispatcher.dispatch(ClientEvent::Disconnected(client.clone()));
            });
        }

        self.connections
            .lock()
            .unwrap()
            .insert(client_id.clone(), conn.clone());
        self.presence.connect(client.clone());
        self.dispatcher.dispatch(ClientEvent::Connected(client.clone()));
        info!(client_id = %client_id, user_id = %user_id, "client connected");

        // Read loop: this endpoint only pushes, so inbound traffic is
        // drained until the peer closes or errors.
        loop {
            match source.next().await {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client_id = %client_id, error = %e, "read failed");
                    break;
                }
            }
        }

        conn.close_and_cleanup(CLOSE_NORMAL, "bye").await;
        info!(client_id = %client_id, "client disconnected");
    }
}

fn plain_response(status: StatusCode) -> ErrorResponse {
    let mut resp = ErrorResponse::new(None);
    *resp.status_mut() = status;
    resp
}

/// Empty `Origin` is permitted; a configured allow-list rejects everything
/// else it does not contain.
fn origin_allowed(allowed: Option<&[String]>, headers: &HeaderMap) -> bool {
    let Some(allowed) = allowed else { return true };
    let Some(origin) = headers.get("Origin").and_then(|v| v.to_str().ok()) else {
        return true;
    };
    if origin.is_empty() {
        return true;
    }
    allowed.iter().any(|a| a == origin)
}

/// The subject comes from the `userId` cookie.
fn user_id_from_headers(headers: &HeaderMap) -> Option<UserId> {
    let cookies = headers.get("Cookie")?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some("userId") {
            let value = parts.next().unwrap_or("").trim();
            if !value.is_empty() {
                return Some(UserId::from(value));
            }
        }
    }
    None
}

/// `-A8df` style suffix appended to the user id to form a client id.
fn random_client_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut suffix = String::with_capacity(5);
    suffix.push('-');
    for _ in 0..4 {
        let n = rand::random::<u32>() as usize % ALPHABET.len();
        suffix.push(ALPHABET[n] as char);
    }
    suffix
}
