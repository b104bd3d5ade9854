use std::io;

use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Diagnostics go to stderr so they never mix with the data on stdout
pub fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };

    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, true),
        Err(_) => (EnvFilter::new(level), false),
    };

    let fmt_layer = fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    if !from_env {
        debug!("\"RUST_LOG\" variable not set, defaulting to {level}");
    }
}
