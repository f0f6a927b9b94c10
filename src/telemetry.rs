//! `tracing` subscriber wiring. Kept separate from `main` so library
//! consumers (tests, embedders) can opt in without pulling in a binary.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber that writes structured lines to stderr,
/// honoring `RUST_LOG` if set, defaulting to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
