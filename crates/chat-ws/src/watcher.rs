//! The log watcher: drives fan-out from the event stream.

use std::sync::Arc;
use std::time::Duration;

use chat_event_log::{Event, LogConsumer};
use chat_rooms::{RoomServer, WatchAuthorizer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consumes the event log (the watcher's own consumer group) and delivers
/// each inserted message to its room.
///
/// Delivery is best-effort: undecodable records are logged and skipped (the
/// sink is the durable path), deletes are not re-broadcast, and records are
/// committed after the delivery attempt.
pub async fn run_watcher<C, A>(
    mut consumer: C,
    server: Arc<RoomServer<A>>,
    cancel: CancellationToken,
) where
    C: LogConsumer,
    A: WatchAuthorizer,
{
    info!("watcher started");

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                info!("watcher stopped");
                return;
            }
            fetched = consumer.fetch() => fetched,
        };

        let record = match fetched {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "watcher fetch failed");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(FETCH_RETRY_DELAY) => continue,
                }
            }
        };

        match Event::decode(record.event_type.as_deref(), &record.payload) {
            Ok(Event::Inserted(event)) => {
                let msg = event.msg;
                if let Err(e) = server.send_message_to(&msg.topic_id, &msg).await {
                    error!(topic_id = %msg.topic_id, message_id = %msg.id, error = %e, "fan-out failed");
                }
            }
            // Tombstones are not pushed to rooms.
            Ok(Event::Deleted(_)) => {}
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "skipping undecodable record");
            }
        }

        if let Err(e) = consumer.commit(std::slice::from_ref(&record.id)).await {
            warn!(record_id = %record.id, error = %e, "watcher commit failed");
        }
    }
}
