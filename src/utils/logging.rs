use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Install the default subscriber. Safe to call more than once; later
/// calls keep the subscriber already in place.
pub fn init() {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
