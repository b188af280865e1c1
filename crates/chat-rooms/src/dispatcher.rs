//! Client lifecycle events, from the socket layer to the room server.

use tokio::sync::mpsc;
use tracing::warn;

use crate::client::Client;

/// A client's socket opened or closed.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    Connected(Client),
    Disconnected(Client),
}

/// Fans client events into the reconciliation loop. Events for one client
/// are processed in dispatch order.
#[derive(Clone)]
pub struct RoomDispatcher {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl RoomDispatcher {
    /// Returns the dispatcher and the receiving end for
    /// [`run_client_events`](crate::run_client_events).
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn dispatch(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            warn!("room event dropped: reconciliation loop is gone");
        }
    }
}
