//! Tracing init.
//!
//! Uses config::ObservabilityConfig for DEVBOOT_QUIET, DEVBOOT_LOG_LEVEL and
//! DEVBOOT_LOG_JSON. Output goes to stderr next to the progress lines.

use devboot_core::config::ObservabilityConfig;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing. Call once at process startup.
/// `--verbose` wins over RUST_LOG and DEVBOOT_QUIET.
pub fn init_tracing(verbose: bool) {
    let cfg = ObservabilityConfig::from_env();
    let filter = if verbose {
        EnvFilter::new("devboot=debug")
    } else {
        let level = if cfg.quiet {
            "devboot=warn".to_string()
        } else {
            cfg.log_level.clone()
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level))
    };

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbose),
            )
            .try_init()
    };
}
