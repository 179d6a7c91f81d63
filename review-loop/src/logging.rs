//! Diagnostic tracing for review-loop.
//!
//! Stdout carries exactly one JSON response per invocation, so every log line
//! goes to stderr. The comment thread, not the log, is the durable record of
//! workflow progress.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `warn`, or `debug` for
/// this crate when `verbose` is true.
///
/// ```bash
/// RUST_LOG=review_loop=debug review-loop next
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,review_loop=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
