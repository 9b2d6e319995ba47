//! Logging infrastructure - structured tracing throughout the bridge
//!
//! Design: every subsystem logs through the `tracing` macros re-exported here.
//! Bridge events carry an `event = "..."` field so they can be filtered in
//! JSON output. Initialization is idempotent.

use once_cell::sync::OnceCell;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub use tracing::{debug, error, info, trace, warn, Level};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Whether `perf::track` guards report durations
static TRACK_PERFORMANCE: AtomicBool = AtomicBool::new(false);

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console output when `None`
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable performance tracking
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // TETHER_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("TETHER_LOG_LEVEL") {
            config.level = parse_level(&level);
        }

        // TETHER_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("TETHER_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("TETHER_LOG_JSON").is_ok();
        config.show_spans = std::env::var("TETHER_LOG_SPANS").is_ok();

        if let Ok(val) = std::env::var("TETHER_LOG_PERF") {
            config.track_performance = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Verbose config for debugging lifetime problems
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: None,
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Parse a level name, falling back to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging from the environment
pub fn init() -> Option<WorkerGuard> {
    init_with_config(LogConfig::from_env())
}

/// Initialize logging with custom configuration.
///
/// Only the first call installs a subscriber. When logging to a file the
/// returned guard must be kept alive to flush buffered lines.
pub fn init_with_config(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        TRACK_PERFORMANCE.store(config.track_performance, Ordering::Relaxed);
        guard = install(&config);
    });
    guard
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn install(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={}", config.level.as_str().to_lowercase())));

    let span_events = if config.show_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let (writer, guard) = match config.log_path.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file = path.file_name().map_or_else(|| "tether.log".into(), |f| f.to_os_string());
            let (w, g) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
            (w, Some(g))
        }
        None => {
            let (w, g) = tracing_appender::non_blocking(io::stderr());
            (w, Some(g))
        }
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json_format {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions))
            .with_line_number(cfg!(debug_assertions))
            .boxed()
    };

    // Another subscriber may already be installed (host application, tests)
    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .ok()?;

    guard
}

// ============================================================================
// Bridge events
// ============================================================================

/// Log anchor registration
#[inline]
pub fn log_anchor_register(anchor: u64, module: u32, strong: bool) {
    trace!(
        event = "anchor_register",
        anchor,
        module,
        strong,
        "liveness anchor registered"
    );
}

/// Log a module sweep of the anchor registry
pub fn log_anchor_sweep(module: u32, strong: usize, weak: usize) {
    debug!(
        event = "anchor_sweep",
        module,
        strong,
        weak,
        "anchors swept"
    );
}

/// Log a method invocation crossing into native code
#[inline]
pub fn log_invoke(class: &str, method: &str, args: usize) {
    trace!(
        event = "invoke",
        class,
        method,
        args,
        "native method invoked"
    );
}

/// Log a failed or refused invocation
pub fn log_invoke_failed(class: &str, method: &str, reason: &str) {
    warn!(
        event = "invoke_failed",
        class,
        method,
        reason,
        "native invocation failed"
    );
}

/// Log a module lifecycle transition
pub fn log_module_state(module: u32, name: &str, state: &str) {
    info!(
        event = "module_state",
        module,
        name,
        state,
        "module state changed"
    );
}

/// Log a lifetime-discipline violation
pub fn log_lifetime_violation(detail: &str, strict: bool) {
    error!(
        event = "lifetime_violation",
        detail,
        strict,
        "lifetime violation"
    );
}

/// Log a synthesized value type
pub fn log_struct_registered(name: &str, size: usize, pod: bool) {
    debug!(
        event = "struct_registered",
        name,
        size,
        pod,
        "value type registered"
    );
}

/// Log destruction of a native instance
#[inline]
pub fn log_instance_destroyed(class: u32, addr: usize) {
    trace!(
        event = "instance_destroyed",
        class,
        addr,
        "native instance destroyed"
    );
}

/// Performance tracking utilities
pub mod perf {
    use super::TRACK_PERFORMANCE;
    use std::sync::atomic::Ordering;
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            if !TRACK_PERFORMANCE.load(Ordering::Relaxed) {
                return;
            }
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}
