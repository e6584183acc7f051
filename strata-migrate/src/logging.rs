//! Tracing setup for binaries and tests embedding the engine

use tracing_subscriber::EnvFilter;

/// Install a console subscriber filtered at `log_level`.
///
/// Falls back to `RUST_LOG`, then to `info`, when `log_level` is not a valid
/// filter. Returns `false` if a global subscriber was already installed.
pub fn init_tracing(log_level: &str) -> bool {
    let env_filter = EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
    {
        Ok(()) => true,
        Err(_) => {
            tracing::debug!("Global tracing subscriber already initialized, skipping");
            false
        }
    }
}
