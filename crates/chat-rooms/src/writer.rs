//! The sharded writer: per-user serialised socket writes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::client::Client;

/// Bound of each shard queue; a full queue blocks producers, which is the
/// backpressure signal.
pub const SHARD_QUEUE_CAPACITY: usize = 30;

struct WriteJob {
    client: Client,
    payload: Arc<Vec<u8>>,
}

/// A fixed pool of single-consumer queues. A session's shard is
/// `hash(user_id) % N`, stable per user, so writes to one user are
/// serialised with no interleaving or reordering across concurrent
/// broadcasts. A slow socket stalls only its own shard.
pub struct ShardedWriter {
    shards: Vec<mpsc::Sender<WriteJob>>,
}

impl ShardedWriter {
    /// Spawns `num_shards` workers. The pool drains and stops when the
    /// writer is dropped.
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards > 0, "sharded writer needs at least one worker");

        let shards = (0..num_shards)
            .map(|_| {
                let (tx, mut rx) = mpsc::channel::<WriteJob>(SHARD_QUEUE_CAPACITY);
                tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        if let Err(e) = job.client.conn().write(&job.payload).await {
                            // Recovery is the connection's responsibility;
                            // its error path runs the disconnect sequence.
                            warn!(
                                user_id = %job.client.user_id(),
                                client_id = %job.client.client_id(),
                                error = %e,
                                "can not write to client's connection"
                            );
                        }
                    }
                });
                tx
            })
            .collect();

        Self { shards }
    }

    /// Default worker count: `min(2, cpu_count)`.
    pub fn default_shards() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus.min(2)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Enqueues one write. Awaits when the shard queue is full.
    pub async fn write_to(&self, client: Client, payload: Arc<Vec<u8>>) {
        let shard = Self::shard_for(client.user_id().as_str(), self.shards.len());
        if self.shards[shard]
            .send(WriteJob { client, payload })
            .await
            .is_err()
        {
            error!(shard, "shard worker is gone, dropping write");
        }
    }

    fn shard_for(user_id: &str, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        (hasher.finish() % shards as u64) as usize
    }
}
