//! Service wiring.

use std::sync::Arc;

use chat_api::ApiState;
use chat_authz::{AuthzClient, AuthzConfig};
use chat_bucket_store::BucketStore;
use chat_config::ChatConfig;
use chat_core::MessageService;
use chat_event_log::{LogBackedRepository, RedisLogConsumer, RedisLogProducer};
use chat_presence::PresenceStore;
use chat_rooms::{run_client_events, RoomDispatcher, RoomServer, ShardedWriter};
use chat_sink::Sink;
use chat_ws::{
    run_watcher, WsAuthorizer, WsServer, WsServerConfig, CLOSE_INTERNAL_ERROR, CLOSE_POLICY,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

type AnyError = Box<dyn std::error::Error>;

fn authz_client(config: &ChatConfig) -> Result<AuthzClient, AnyError> {
    let mut authz_config = AuthzConfig::new(&config.authz.api_url, &config.authz.token);
    authz_config.timeout = config.authz.timeout;
    Ok(AuthzClient::new(authz_config)?)
}

/// The HTTP message API: producer + pagination reader.
pub async fn run_api(config: ChatConfig, cancel: CancellationToken) -> Result<(), AnyError> {
    let store = BucketStore::open(&config.store.path)?;
    let producer =
        RedisLogProducer::connect(&config.redis.url, config.redis.stream_key.clone()).await?;
    let repo = LogBackedRepository::new(producer, store.clone());
    let service = MessageService::new(repo, authz_client(&config)?);

    let state = ApiState::new(service, store, config.api.base_url.clone());
    let router = chat_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr).await?;
    info!(addr = %config.api.bind_addr, "api server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    info!("api server stopped");
    Ok(())
}

/// The stream sink: materialises the log into the bucket store.
pub async fn run_sink(config: ChatConfig, cancel: CancellationToken) -> Result<(), AnyError> {
    let store = BucketStore::open(&config.store.path)?;
    let consumer = RedisLogConsumer::connect(
        &config.redis.url,
        config.redis.stream_key.clone(),
        config.redis.sink_group.clone(),
        config.redis.block_ms,
    )
    .await?;

    Sink::new(consumer, store).run(cancel).await?;
    Ok(())
}

/// The WebSocket fan-out server: watcher, rooms, sockets.
pub async fn run_ws(config: ChatConfig, cancel: CancellationToken) -> Result<(), AnyError> {
    let presence = Arc::new(PresenceStore::new());
    let (dispatcher, client_events) = RoomDispatcher::new();

    let room_server = Arc::new(RoomServer::new(
        presence.clone(),
        WsAuthorizer::new(authz_client(&config)?),
        ShardedWriter::new(ShardedWriter::default_shards()),
    ));

    let ws_config = WsServerConfig {
        bind_addr: config.ws.bind_addr.clone(),
        allowed_origins: config.ws.allowed_origins.clone(),
    };
    let ws_server = Arc::new(WsServer::new(ws_config, presence, dispatcher));
    let (listener, _) = ws_server.bind().await?;

    // Reconciliation loop; a failed connect closes the socket with an
    // authorization or internal code depending on the error class.
    let reconciler = {
        let ws_server = ws_server.clone();
        tokio::spawn(run_client_events(
            room_server.clone(),
            client_events,
            cancel.clone(),
            move |client, error| {
                let (code, reason) = match error {
                    chat_core::CoreError::NotAuthorized { .. } => (CLOSE_POLICY, "not authorized"),
                    _ => (CLOSE_INTERNAL_ERROR, "internal error"),
                };
                let ws_server = ws_server.clone();
                let client_id = client.client_id().clone();
                tokio::spawn(async move {
                    ws_server.close_client(&client_id, code, reason).await;
                });
            },
        ))
    };

    let watcher_consumer = RedisLogConsumer::connect(
        &config.redis.url,
        config.redis.stream_key.clone(),
        config.redis.watcher_group.clone(),
        config.redis.block_ms,
    )
    .await?;
    let watcher = tokio::spawn(run_watcher(
        watcher_consumer,
        room_server.clone(),
        cancel.clone(),
    ));

    ws_server.run(listener, cancel).await;

    let _ = watcher.await;
    let _ = reconciler.await;
    info!("ws server stopped");
    Ok(())
}
