//! Logging setup

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogLevel;

/// Install a stderr subscriber at `level`; `RUST_LOG` takes precedence.
///
/// Returns `false` if a global subscriber was already installed, which is
/// normal when several tests initialise logging.
pub fn init_logging(level: LogLevel) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(console).try_init().is_ok()
}
