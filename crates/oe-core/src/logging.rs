//! Logging infrastructure for oxidized-espresso

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, LogLevel};

impl LogLevel {
    /// Matching `tracing` level, `None` when logging is off
    pub fn as_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

/// Initialize the logging system based on configuration
///
/// Virtual cores run on named host threads (`core-0`, `core-1`, ...), so
/// thread names are included to tell interleaved guest threads apart.
pub fn init(config: &Config) {
    let Some(level) = config.debug.log_level.as_tracing_level() else {
        return;
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let console = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = if config.debug.log_to_file {
        std::fs::File::create(&config.debug.log_path)
            .ok()
            .map(|file| fmt::layer().with_writer(file).with_ansi(false))
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();
}

/// Initialize logging with default settings (for tests and quick starts)
pub fn init_default() {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Log a CPU trace message
#[macro_export]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "cpu", $($arg)*)
    };
}

/// Log a CPU debug message
#[macro_export]
macro_rules! cpu_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "cpu", $($arg)*)
    };
}

/// Log a JIT trace message
#[macro_export]
macro_rules! jit_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "jit", $($arg)*)
    };
}

/// Log a JIT debug message
#[macro_export]
macro_rules! jit_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "jit", $($arg)*)
    };
}

/// Log a scheduler trace message
#[macro_export]
macro_rules! sched_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "scheduler", $($arg)*)
    };
}

/// Log a scheduler debug message
#[macro_export]
macro_rules! sched_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "scheduler", $($arg)*)
    };
}

/// Log a kernel trace message
#[macro_export]
macro_rules! kernel_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "kernel", $($arg)*)
    };
}

/// Log a kernel debug message
#[macro_export]
macro_rules! kernel_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "kernel", $($arg)*)
    };
}
