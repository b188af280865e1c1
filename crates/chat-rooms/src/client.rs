//! Client sessions as the fan-out side sees them.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{ClientId, UserId};
use chat_presence::Device;
use thiserror::Error;

/// A connection write failed; the connection owns its own recovery (it
/// converges on the disconnect path).
#[derive(Error, Debug)]
#[error("connection write failed: {0}")]
pub struct WriteError(pub String);

/// Write half of a client's socket.
#[async_trait]
pub trait ClientConn: Send + Sync {
    async fn write(&self, data: &[u8]) -> Result<(), WriteError>;
}

/// One client session: a socket-unique id, the owning user, and the write
/// handle. Cheap to clone; rooms and the presence store share the same
/// underlying connection.
#[derive(Clone)]
pub struct Client {
    client_id: ClientId,
    user_id: UserId,
    conn: Arc<dyn ClientConn>,
}

impl Client {
    pub fn new(client_id: ClientId, user_id: UserId, conn: Arc<dyn ClientConn>) -> Self {
        Self {
            client_id,
            user_id,
            conn,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn conn(&self) -> &Arc<dyn ClientConn> {
        &self.conn
    }
}

impl Device for Client {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn client_id(&self) -> &ClientId {
        &self.client_id
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
