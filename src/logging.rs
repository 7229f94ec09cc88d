//! Subscriber setup for the `aurora-vector` binary.
//!
//! The library only emits `tracing` events. Embedders install their own
//! subscriber; the CLI calls [`init`].

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a stderr fmt subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `debug` with
/// `debug = true` and `info` without. Calling it twice is harmless.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized at {default_level}");
    }
}
