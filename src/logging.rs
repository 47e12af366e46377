//! Tracing subscriber setup for the `finder` binary.
//!
//! Structured logs go to stderr. The filter is taken from, in order:
//!
//! 1. `FINDER_LOG` (e.g. `finder=debug,tower_http=info`)
//! 2. `RUST_LOG`
//! 3. `--verbose` → `finder=debug,info`
//! 4. `info`

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Call once, before loading config.
pub fn init_subscriber(verbose: bool) {
    let stderr_is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(stderr_is_tty)
        .with_target(verbose);

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(build_env_filter(verbose))
        .with(fmt_layer)
        .try_init();
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    if let Ok(directives) = std::env::var("FINDER_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(default_directives(verbose))
}

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "finder=debug,info"
    } else {
        "info"
    }
}
