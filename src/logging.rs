//! Structured logging setup.
//!
//! Logs go to stderr so that `show` and `export` output on stdout stays
//! pipeable. The filter comes from `STOCKWATCH_LOG` (standard `EnvFilter`
//! syntax) and defaults to `stockwatch=info`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "STOCKWATCH_LOG";
const DEFAULT_FILTER: &str = "stockwatch=info";

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    // a subscriber was already installed (tests, embedding)
    let _ = result;
}
