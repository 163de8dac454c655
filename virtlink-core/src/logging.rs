//! Tracing subscriber setup.
//!
//! The runtime emits structured `tracing` events: per-client fields on
//! connect, disconnect and heartbeat expiry, per-call fields on retry and
//! timeout. This module only wires a default subscriber for binaries and
//! tests that do not install their own; libraries embedding virtlink are
//! expected to bring their own subscriber and skip this entirely.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install a formatting subscriber honouring `RUST_LOG`.
///
/// Calling this twice is harmless: a second registration attempt is ignored
/// so tests can call it unconditionally.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
    }
}
