//! Structured logging initialization (C16): `tracing` + `tracing-subscriber`, honoring
//! `RUST_LOG` via `EnvFilter`, defaulting to `info` when unset.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the global `tracing` subscriber once per process. Safe to call from multiple `CRAWL`
/// invocations within the same host process; later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_target(false)
            .compact()
            .try_init()
            .ok();
    });
}
