//! Development-time tracing.
//!
//! Phase narration (plan, data branch, widget summary) and retry diagnostics
//! are emitted as `tracing` events; this module only installs the subscriber.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. When unset, uses `default_directive`, with
/// `widgetgen=debug` appended when `debug` is on.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=widgetgen=debug widgetgen ask "What's our MRR?"
/// ```
pub fn init(default_directive: &str, debug: bool) {
    let directive = if debug {
        format!("{default_directive},widgetgen=debug")
    } else {
        default_directive.to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    // A subscriber may already be installed (tests); keep the first one.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
