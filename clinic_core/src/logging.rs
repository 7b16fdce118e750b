//! Tracing setup for the `clinic` binary and the test suites.
//!
//! Diagnostics always go to stderr so that `--json` output on stdout can be
//! piped without filtering.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when RUST_LOG is unset and `--verbose` is off
const QUIET: &str = "warn";
/// Session, slice and gateway activity, without reqwest/hyper chatter
const VERBOSE: &str = "warn,clinic_core=debug,clinic=debug";

/// Install the global subscriber. RUST_LOG wins over `verbose`.
///
/// Event targets are shown only in verbose mode, where they tell slice
/// and session messages apart.
pub fn init(verbose: bool) {
    let default_filter = if verbose { VERBOSE } else { QUIET };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("clinic_core=debug"))
        .try_init();
}
