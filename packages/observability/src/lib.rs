//! Centralized logging setup.
//!
//! Services are log producers only: they call [`init`] once at startup and
//! use `tracing` macros everywhere else, with no knowledge of where the
//! lines end up. `RUST_LOG` always wins over the configured default level.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (`api`, `sink`, `ws`); stamped on the init line
    /// so multi-service logs are attributable.
    pub service_name: String,
    /// Default level filter when `RUST_LOG` is unset.
    pub default_level: String,
    /// Emit one-line JSON instead of the human-readable format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            json: false,
        }
    }
}

/// Zero-config entry point.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialises the global subscriber. Safe to call more than once; only the
/// first call takes effect (later calls in tests would otherwise panic).
pub fn init_with_config(config: LogConfig) {
    if INITIALISED.set(()).is_err() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };

    if result.is_ok() {
        tracing::info!(
            service = %config.service_name,
            level = %config.default_level,
            "logging initialised"
        );
    }
}
