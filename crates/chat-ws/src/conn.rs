//! The server-side connection wrapper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use chat_rooms::{ClientConn, WriteError};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::server::CLOSE_GOING_AWAY;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Write half of one socket plus the idempotent disconnect path.
///
/// `close_and_cleanup` is the single convergence point for the three
/// disconnect triggers; an atomic flag makes running it twice harmless. The
/// cleanup hook (installed by the server) removes the session from the
/// presence store and emits `client.disconnected` exactly once.
pub struct WsConn {
    sink: Mutex<WsSink>,
    closed: AtomicBool,
    cleanup: OnceLock<Box<dyn Fn() + Send + Sync>>,
}

impl WsConn {
    pub fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            cleanup: OnceLock::new(),
        }
    }

    /// Installs the disconnect hook. Called once by the server right after
    /// the upgrade, before the connection is visible anywhere else.
    pub fn set_cleanup(&self, cleanup: impl Fn() + Send + Sync + 'static) {
        if self.cleanup.set(Box::new(cleanup)).is_err() {
            warn!("connection cleanup hook installed twice");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Writes the close frame, closes the socket and runs the cleanup hook.
    /// Idempotent: only the first caller does any of it.
    pub async fn close_and_cleanup(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut sink = self.sink.lock().await;
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                debug!(error = %e, "close frame not delivered");
            }
            let _ = sink.close().await;
        }

        if let Some(cleanup) = self.cleanup.get() {
            cleanup();
        }
    }
}

#[async_trait]
impl ClientConn for WsConn {
    /// Sends one text frame. A failed write runs the disconnect path and
    /// reports the error to the sharded writer, which logs it.
    async fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        if self.is_closed() {
            return Err(WriteError("connection is closed".into()));
        }

        let text = String::from_utf8(data.to_vec())
            .map_err(|e| WriteError(format!("payload is not utf-8: {e}")))?;

        let result = {
            let mut sink = self.sink.lock().await;
            sink.send(WsMessage::text(text)).await
        };

        if let Err(e) = result {
            self.close_and_cleanup(CLOSE_GOING_AWAY, "going away").await;
            return Err(WriteError(e.to_string()));
        }
        Ok(())
    }
}
