//! Operator-facing logging. Reads `RUST_LOG`; defaults to `info` for this
//! crate and `warn` for everything else. Output goes to stderr so stdout
//! stays free for task results.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,browser_agent=info,agent=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
