/*!
 * Logging Bootstrap
 * Structured diagnostics through the tracing crate
 */

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// Environment variables:
/// - RUST_LOG: log filter (default: info)
/// - POSIX_SHIM_LOG_JSON: JSON output when "1" or "true"
///
/// A subscriber installed earlier stays in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json_requested() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_line_number(true)
                    .with_current_span(true),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!("posix shim tracing initialized");
    }
}

fn json_requested() -> bool {
    std::env::var("POSIX_SHIM_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}
