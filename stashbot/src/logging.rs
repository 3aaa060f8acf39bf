//! Console logging with a runtime-reloadable filter.
//!
//! The `/logs` chat command flips the active filter between the default
//! and debug profiles via `tracing_subscriber::reload`.

use chrono::Local;
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "stashbot=info,ffbridge=info";

/// Filter directive applied while debug logging is toggled on.
pub const DEBUG_LOG_FILTER: &str = "stashbot=debug,ffbridge=debug";

/// Custom timer that uses the local timezone via chrono.
///
/// This timer formats timestamps using the server's local timezone
/// instead of UTC, making logs easier to correlate with local time.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle for switching log verbosity at runtime.
pub struct LogControl {
    handle: FilterHandle,
    debug_enabled: Mutex<bool>,
}

impl LogControl {
    fn new(handle: FilterHandle) -> Self {
        Self {
            handle,
            debug_enabled: Mutex::new(false),
        }
    }

    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Whether the debug profile is currently active.
    pub fn debug_enabled(&self) -> bool {
        *self.debug_enabled.lock()
    }

    /// Flip between the default and debug filter profiles.
    ///
    /// Returns whether debug logging is active after the flip.
    pub fn toggle_debug(&self) -> crate::Result<bool> {
        let mut enabled = self.debug_enabled.lock();
        let directive = if *enabled {
            DEFAULT_LOG_FILTER
        } else {
            DEBUG_LOG_FILTER
        };
        self.set_filter(directive)?;
        *enabled = !*enabled;
        Ok(*enabled)
    }

    /// Set a new filter directive.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::Other(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }
}

/// Initialize console logging with a reloadable filter.
///
/// The `RUST_LOG` environment variable overrides the default directive.
pub fn init_logging() -> crate::Result<LogControl> {
    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to initialize logging: {}", e)))?;

    Ok(LogControl::new(filter_handle))
}
