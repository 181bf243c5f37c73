//! Subscriber setup for binaries and embedders.
//!
//! The library itself only emits `log` records and `tracing` spans; nothing
//! here is required to use it.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted for the filter before `default_filter`.
pub const LOG_ENV: &str = "DOCSYNC_LOG";

/// Installs a `fmt` subscriber and routes `log` records into it.
///
/// Returns false if a subscriber or logger was already installed; calling it
/// twice is harmless.
pub fn init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    let installed = tracing::subscriber::set_global_default(subscriber).is_ok();
    let bridged = tracing_log::LogTracer::init().is_ok();

    if installed && bridged {
        log::debug!("Logging initialised");
    }
    installed && bridged
}
