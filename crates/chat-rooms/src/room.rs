//! One room: the presence set for a topic.

use std::sync::Arc;

use chat_core::TopicId;
use chat_presence::PresenceStore;
use tracing::debug;

use crate::client::Client;
use crate::writer::ShardedWriter;

/// The set of currently-connected authorized client sessions for one topic.
///
/// Rooms hold [`Client`] handles keyed through the presence index; the
/// server-wide presence store stays the single authority on who is online.
pub struct Room {
    pub id: TopicId,
    presence: PresenceStore<Client>,
}

impl Room {
    /// Creates the room pre-seeded with `clients`.
    pub fn new(id: TopicId, clients: Vec<Client>) -> Self {
        debug!(topic_id = %id, seeded = clients.len(), "creating room");
        let presence = PresenceStore::new();
        for client in clients {
            presence.connect(client);
        }
        Self { id, presence }
    }

    pub fn add_client(&self, client: Client) {
        self.presence.connect(client);
    }

    pub fn remove_client(&self, client: &Client) {
        self.presence.disconnect(client);
    }

    pub fn contains_client(&self, client: &Client) -> bool {
        self.presence
            .clients_for_user(chat_presence::Device::user_id(client))
            .iter()
            .any(|c| c.client_id() == client.client_id())
    }

    /// An empty room is transient: the room server drops it under its
    /// write lock.
    pub fn is_empty(&self) -> bool {
        self.presence.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.presence.len()
    }

    /// Enqueues the already-serialised message for every member. Blocks
    /// only when a shard queue is full.
    pub async fn broadcast(&self, writer: &ShardedWriter, payload: &Arc<Vec<u8>>) {
        for client in self.presence.iter_all() {
            writer.write_to(client, payload.clone()).await;
        }
    }
}
