//! Diagnostics for debugging the assistant itself.
//!
//! `tracing` events go to stderr, filtered by `RUST_LOG`, so they never mix
//! with replies, command output or confirmation prompts on stdout. The
//! conversation and agent transcripts (`io/transcript`) are a separate,
//! always-on product artifact.

use std::env;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber. Safe to call more than once; only the
/// first call takes effect.
///
/// ```bash
/// RUST_LOG=arisu::driver=debug,arisu::agent=debug arisu ask "run the tests"
/// ```
pub fn init() {
    let directives = env::var(EnvFilter::DEFAULT_ENV).ok();
    let installed = tracing_subscriber::registry()
        .with(filter_from(directives.as_deref()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init();
    if let Err(err) = installed {
        tracing::debug!(%err, "tracing subscriber already installed");
    }
}

/// Build a filter from `RUST_LOG`-style directives, falling back to
/// [`DEFAULT_FILTER`] when they are missing or invalid.
pub fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
