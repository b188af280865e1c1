//! Environment-driven configuration for the three services.
//!
//! Every knob has a default good for local development and a `CHAT_*`
//! environment override. Unparseable numeric values fall back to the
//! default with a warning rather than failing startup.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Event log settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Stream holding the message events.
    pub stream_key: String,
    /// Consumer group of the sink.
    pub sink_group: String,
    /// Consumer group of the fan-out watcher.
    pub watcher_group: String,
    /// `XREADGROUP` block timeout in milliseconds.
    pub block_ms: u64,
}

/// Bucket store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Authorization oracle settings.
#[derive(Debug, Clone)]
pub struct AuthzSettings {
    pub api_url: String,
    pub token: String,
    pub timeout: Duration,
}

/// HTTP API settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub bind_addr: String,
    /// Prefix used when building pagination links.
    pub base_url: String,
}

/// WebSocket server settings.
#[derive(Debug, Clone)]
pub struct WsSettings {
    pub bind_addr: String,
    /// `None` disables the origin check.
    pub allowed_origins: Option<Vec<String>>,
}

/// Everything a `chatd` service needs.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub log_level: String,
    pub redis: RedisConfig,
    pub store: StoreConfig,
    pub authz: AuthzSettings,
    pub api: ApiSettings,
    pub ws: WsSettings,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                stream_key: "chat:events".to_string(),
                sink_group: "sink".to_string(),
                watcher_group: "watcher".to_string(),
                block_ms: 250,
            },
            store: StoreConfig {
                path: PathBuf::from("./data/buckets.db"),
            },
            authz: AuthzSettings {
                api_url: "http://127.0.0.1:8443".to_string(),
                token: String::new(),
                timeout: Duration::from_secs(10),
            },
            api: ApiSettings {
                bind_addr: "127.0.0.1:8888".to_string(),
                base_url: "http://127.0.0.1:8888".to_string(),
            },
            ws: WsSettings {
                bind_addr: "127.0.0.1:7100".to_string(),
                allowed_origins: None,
            },
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_string(&mut config.log_level, "CHAT_LOG_LEVEL");
        override_string(&mut config.redis.url, "CHAT_REDIS_URL");
        override_string(&mut config.redis.stream_key, "CHAT_EVENTS_STREAM");
        override_string(&mut config.redis.sink_group, "CHAT_SINK_GROUP");
        override_string(&mut config.redis.watcher_group, "CHAT_WATCHER_GROUP");
        config.redis.block_ms = env_u64("CHAT_REDIS_BLOCK_MS", config.redis.block_ms);

        if let Ok(path) = std::env::var("CHAT_STORE_PATH") {
            config.store.path = PathBuf::from(path);
        }

        override_string(&mut config.authz.api_url, "CHAT_AUTHZ_URL");
        override_string(&mut config.authz.token, "CHAT_AUTHZ_TOKEN");
        config.authz.timeout =
            Duration::from_secs(env_u64("CHAT_AUTHZ_TIMEOUT_SECS", config.authz.timeout.as_secs()));

        override_string(&mut config.api.bind_addr, "CHAT_API_ADDR");
        override_string(&mut config.api.base_url, "CHAT_API_BASE_URL");

        override_string(&mut config.ws.bind_addr, "CHAT_WS_ADDR");
        if let Ok(raw) = std::env::var("CHAT_WS_ALLOWED_ORIGINS") {
            config.ws.allowed_origins = parse_origins(&raw);
        }

        config
    }
}

fn override_string(slot: &mut String, key: &str) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable numeric setting, using default");
            default
        }),
    }
}

/// Comma-separated allow-list; blank entries dropped, an empty result means
/// "no check".
fn parse_origins(raw: &str) -> Option<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if origins.is_empty() {
        None
    } else {
        Some(origins)
    }
}
