//! Logging bootstrap built on the tracing ecosystem.
//!
//! Call [`init_logging`] once at startup; every `tracing` macro (and, via
//! the bridge, every `log` macro) then ends up on stderr, filtered by
//! `RUST_LOG`.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize process-wide logging. Subsequent calls are no-ops.
pub fn init_logging(name: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        tracing_log::LogTracer::init().ok();

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .ok();

        tracing::debug!(name, "logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, error, info, trace, warn};

    #[test]
    fn test_init_logging_idempotent() {
        init_logging("test_node");
        init_logging("test_node_2");
    }

    #[test]
    fn test_tracing_macros() {
        init_logging("test_macros");

        trace!("trace message");
        debug!("debug message");
        info!("info message");
        warn!("warn message");
        error!("error message");
    }

    #[test]
    fn test_log_crate_forwarding() {
        init_logging("test_log_forward");

        log::info!("log crate info");
        log::warn!("log crate warn");
    }
}
