//! Subscriber setup shared by both binaries.
use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or does not parse.
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter from a raw `RUST_LOG` value, falling back to [`DEFAULT_FILTER`].
pub fn env_filter(raw: Option<&str>) -> EnvFilter {
    raw.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a compact fmt subscriber. `stderr` keeps stdout free for machine output.
pub fn init(stderr: bool) {
    let raw = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(raw.as_deref()))
        .with_target(false)
        .compact();
    if stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}
