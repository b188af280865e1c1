//! The WebSocket fan-out server.
//!
//! Upgrades `/ws`, identifies the subject from the `userId` cookie,
//! registers the session in the presence store, and emits client lifecycle
//! events to the room server. The watcher consumes the event log (its own
//! consumer group) and drives room delivery.
//!
//! Disconnect has three triggers (remote close, a write error from the
//! sharded writer, server shutdown) and all three converge on one
//! idempotent cleanup: remove from presence, emit `client.disconnected`,
//! close the socket.

mod authorizer;
mod conn;
mod server;
mod watcher;

#[cfg(test)]
mod tests;

pub use authorizer::WsAuthorizer;
pub use conn::WsConn;
pub use server::{WsServer, WsServerConfig, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_POLICY};
pub use watcher::run_watcher;
