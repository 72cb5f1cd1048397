//! Logging configuration for the AutoFDO profile consumer
//!
//! Initialization helpers for the `log` facade backed by `env_logger`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use autofdo::logging;
//!
//! // Initialize with default level (Warn)
//! logging::init();
//!
//! // Or initialize from RUST_LOG environment variable
//! logging::init_from_env();
//!
//! // Or initialize with a specific level
//! logging::init_with_level(log::LevelFilter::Debug);
//! ```
//!
//! # Log Levels
//!
//! - `error!` - The profile could not be used; profile-guided mode is off
//! - `warn!` - Suspicious profile contents that were tolerated
//! - `info!` - Per-compilation milestones, rejected auxiliary modules
//! - `debug!` - Per-function decisions (promotion rounds, frequency class)
//! - `trace!` - Per-block and per-edge propagation detail
//!
//! Filtering by module works as usual:
//!
//! ```bash
//! RUST_LOG=autofdo::annotate::propagate=trace afdo dump fbdata.afdo
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging with sensible defaults (Warn level).
///
/// This only initializes once; subsequent calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize logging with a specific level.
///
/// This only initializes once; subsequent calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {}:{} - {}",
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize logging from the RUST_LOG environment variable.
///
/// If RUST_LOG is not set, defaults to Warn level.
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Initialize logging for tests.
///
/// ```rust,ignore
/// #[test]
/// fn test_something() {
///     autofdo::logging::init_test();
/// }
/// ```
pub fn init_test() {
    // try_init() doesn't panic if already initialized
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

/// Whether one of the `init*` helpers (other than `init_test`) has run.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
    }

    #[test]
    fn test_log_levels() {
        init_test();

        log::error!("cannot read profile");
        log::info!("not importing aux module");
        log::trace!("bb2 count 40");
    }
}
