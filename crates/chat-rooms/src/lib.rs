//! Rooms and real-time fan-out.
//!
//! A *room* is the in-memory presence set for one topic on the fan-out
//! server. The room server owns the topology (`topic_id → room`,
//! `client_id → rooms`) and reconciles it on client connect/disconnect and
//! lazy room creation. Delivery goes through the sharded writer, which
//! serialises writes per user and confines slow sockets to one shard.
//!
//! Lock order, never reversed: room-server topology → per-room presence →
//! the server-wide presence store.

mod client;
mod dispatcher;
mod room;
mod server;
mod writer;

pub use client::{Client, ClientConn, WriteError};
pub use dispatcher::{ClientEvent, RoomDispatcher};
pub use room::Room;
pub use server::{run_client_events, RoomServer, WatchAuthorizer};
pub use writer::{ShardedWriter, SHARD_QUEUE_CAPACITY};
