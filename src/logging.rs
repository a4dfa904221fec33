// Tracing setup for the bootstrap binary
// RUST_LOG overrides the default filter, e.g. RUST_LOG=lecture_store=debug

use tracing_subscriber::EnvFilter;

/// Install a console subscriber. Fails if one is already installed.
pub fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}
