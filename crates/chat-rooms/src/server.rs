//! The room server: topology and membership reconciliation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chat_core::{CoreResult, Message, TopicId, UserId};
use chat_presence::{Device, PresenceStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::Client;
use crate::dispatcher::ClientEvent;
use crate::room::Room;
use crate::writer::ShardedWriter;

/// Watch-relation queries against the authorization oracle.
#[async_trait]
pub trait WatchAuthorizer: Send + Sync {
    /// Every user who may watch the topic.
    async fn who_can_watch(&self, topic_id: &TopicId) -> CoreResult<Vec<UserId>>;

    /// The subset of `candidates` the user may watch.
    async fn topics_user_can_watch(
        &self,
        user_id: &UserId,
        candidates: Vec<TopicId>,
    ) -> CoreResult<Vec<TopicId>>;
}

#[derive(Default)]
struct Topology {
    rooms: HashMap<TopicId, Arc<Room>>,
    client_rooms: HashMap<chat_core::ClientId, Vec<TopicId>>,
}

/// Owns room topology and drives fan-out delivery.
///
/// The topology lock is the top of the lock order; oracle calls never run
/// under it.
pub struct RoomServer<A> {
    topology: RwLock<Topology>,
    online: Arc<PresenceStore<Client>>,
    authz: A,
    writer: ShardedWriter,
}

impl<A: WatchAuthorizer> RoomServer<A> {
    pub fn new(online: Arc<PresenceStore<Client>>, authz: A, writer: ShardedWriter) -> Self {
        Self {
            topology: RwLock::new(Topology::default()),
            online,
            authz,
            writer,
        }
    }

    /// Delivers `msg` to every member of the topic's room, creating the
    /// room lazily on first delivery. The message is serialised once.
    pub async fn send_message_to(&self, topic_id: &TopicId, msg: &Message) -> CoreResult<()> {
        let payload = Arc::new(
            serde_json::to_vec(msg)
                .map_err(|e| chat_core::CoreError::Repository(e.to_string()))?,
        );

        let room = self.get_or_create_room(topic_id).await?;
        room.broadcast(&self.writer, &payload).await;
        Ok(())
    }

    /// Looks up the room, creating and seeding it if absent. The write lock
    /// is taken exactly once and the key re-checked under it, so two racing
    /// creators converge on one room.
    pub async fn get_or_create_room(&self, topic_id: &TopicId) -> CoreResult<Arc<Room>> {
        {
            let topology = self.topology.read().unwrap();
            if let Some(room) = topology.rooms.get(topic_id) {
                return Ok(room.clone());
            }
        }

        // Seed membership before taking the write lock: the oracle
        // round-trip must not serialise the whole server.
        let watchers = self.authz.who_can_watch(topic_id).await?;
        let clients = self.online.clients_for_users(watchers.iter());

        let mut topology = self.topology.write().unwrap();
        if let Some(room) = topology.rooms.get(topic_id) {
            return Ok(room.clone());
        }

        let room = Arc::new(Room::new(topic_id.clone(), clients.clone()));
        for client in &clients {
            topology
                .client_rooms
                .entry(Device::client_id(client).clone())
                .or_default()
                .push(topic_id.clone());
        }
        topology.rooms.insert(topic_id.clone(), room.clone());
        info!(topic_id = %topic_id, members = room.member_count(), "room created");
        Ok(room)
    }

    /// Joins the client to every existing room its user may watch and
    /// records the reverse index for disconnect.
    pub async fn on_client_connected(&self, client: Client) -> CoreResult<()> {
        let candidates: Vec<TopicId> = {
            let topology = self.topology.read().unwrap();
            topology.rooms.keys().cloned().collect()
        };

        let topics = self
            .authz
            .topics_user_can_watch(client.user_id(), candidates)
            .await?;

        let mut topology = self.topology.write().unwrap();
        for topic_id in topics {
            // A room may have emptied out between the snapshot and now.
            let Some(room) = topology.rooms.get(&topic_id) else {
                continue;
            };
            room.add_client(client.clone());
            topology
                .client_rooms
                .entry(client.client_id().clone())
                .or_default()
                .push(topic_id);
        }

        debug!(client_id = %client.client_id(), user_id = %client.user_id(), "client joined rooms");
        Ok(())
    }

    /// Removes the client from every room it joined and drops rooms whose
    /// presence set emptied.
    pub fn on_client_disconnected(&self, client: &Client) {
        let mut topology = self.topology.write().unwrap();
        let Some(topics) = topology.client_rooms.remove(client.client_id()) else {
            return;
        };

        for topic_id in topics {
            let Some(room) = topology.rooms.get(&topic_id) else {
                continue;
            };
            room.remove_client(client);
            if room.is_empty() {
                debug!(topic_id = %topic_id, "dropping empty room");
                topology.rooms.remove(&topic_id);
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.topology.read().unwrap().rooms.len()
    }

    pub fn room(&self, topic_id: &TopicId) -> Option<Arc<Room>> {
        self.topology.read().unwrap().rooms.get(topic_id).cloned()
    }

    /// Topics the client is currently joined to.
    pub fn rooms_for_client(&self, client: &Client) -> Vec<TopicId> {
        self.topology
            .read()
            .unwrap()
            .client_rooms
            .get(client.client_id())
            .cloned()
            .unwrap_or_default()
    }
}

/// Drives the client-event stream into the room server until cancellation.
///
/// A connect whose reconciliation fails is handed to `on_connect_error`
/// (the socket layer closes it with an internal-error code).
pub async fn run_client_events<A: WatchAuthorizer>(
    server: Arc<RoomServer<A>>,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    cancel: CancellationToken,
    on_connect_error: impl Fn(Client, &chat_core::CoreError) + Send,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        match event {
            ClientEvent::Connected(client) => {
                if let Err(e) = server.on_client_connected(client.clone()).await {
                    error!(
                        client_id = %client.client_id(),
                        error = %e,
                        "client connect reconciliation failed"
                    );
                    on_connect_error(client, &e);
                }
            }
            ClientEvent::Disconnected(client) => server.on_client_disconnected(&client),
        }
    }
}
