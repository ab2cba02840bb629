//! Log setup for the `mh` binary.
//!
//! Logs go to stderr so stdout carries only command output. `RUST_LOG`
//! overrides the default filter.

use tracing_subscriber::EnvFilter;

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "manual_harness=debug,manual_harness_core=debug"
    } else {
        "info"
    }
}

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
