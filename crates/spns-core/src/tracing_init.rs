//! Shared tracing/logging initialization.
//!
//! The relay binary sets up `tracing_subscriber` with an env-filter and
//! optional JSON output. The configured log level is only a fallback:
//! `RUST_LOG` always wins when it is set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for a crate at a given level,
/// e.g. `default_filter("spns_relay", "debug")` → `"spns_relay=debug"`.
pub fn default_filter(crate_name: &str, level: &str) -> String {
    format!("{crate_name}={level}")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"spns_relay=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
