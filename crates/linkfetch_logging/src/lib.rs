#![deny(missing_docs)]
//! Logging for the linkfetch crates.
//!
//! All pipeline code logs through the `fetch_*` macros, which tag every record
//! with the `linkfetch` target. Applications install a backend once with
//! [`initialize`]; tests use [`initialize_for_tests`].

use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Log target shared by every `fetch_*` macro.
pub const TARGET: &str = "linkfetch";

/// Logs at trace level under the `linkfetch` target.
#[macro_export]
macro_rules! fetch_trace {
    ($($arg:tt)*) => { log::trace!(target: $crate::TARGET, $($arg)*) };
}

/// Logs at debug level under the `linkfetch` target.
#[macro_export]
macro_rules! fetch_debug {
    ($($arg:tt)*) => { log::debug!(target: $crate::TARGET, $($arg)*) };
}

/// Logs at info level under the `linkfetch` target.
#[macro_export]
macro_rules! fetch_info {
    ($($arg:tt)*) => { log::info!(target: $crate::TARGET, $($arg)*) };
}

/// Logs at warn level under the `linkfetch` target.
#[macro_export]
macro_rules! fetch_warn {
    ($($arg:tt)*) => { log::warn!(target: $crate::TARGET, $($arg)*) };
}

/// Logs at error level under the `linkfetch` target.
#[macro_export]
macro_rules! fetch_error {
    ($($arg:tt)*) => { log::error!(target: $crate::TARGET, $($arg)*) };
}

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Only the log file, truncated on start.
    File(PathBuf),
    /// Only the console.
    Terminal,
    /// Console at the configured level plus a file that records everything down to debug.
    Both(PathBuf),
}

impl LogDestination {
    fn file(&self) -> Option<&Path> {
        match self {
            LogDestination::File(path) | LogDestination::Both(path) => Some(path),
            LogDestination::Terminal => None,
        }
    }

    fn console(&self) -> bool {
        !matches!(self, LogDestination::File(_))
    }
}

/// Logger configuration supplied by the embedding application.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Sinks to install.
    pub destination: LogDestination,
    /// Console verbosity. A file sink in `Both` mode is never less verbose than debug.
    pub level: LevelFilter,
    /// Colour console output when the terminal supports it.
    pub colorize: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            destination: LogDestination::Terminal,
            level: LevelFilter::Info,
            colorize: true,
        }
    }
}

/// Parses a level name such as `"warn"` or `"DEBUG"`; unknown names fall back to info.
pub fn parse_level(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Installs the global logger described by `settings`.
///
/// Missing parent directories of a log file are created. Returns `false` when
/// a logger is already installed or no sink could be opened.
pub fn initialize(settings: LogSettings) -> bool {
    let config = record_format();
    let mut sinks: Vec<Box<dyn SharedLogger>> = Vec::new();

    if settings.destination.console() {
        let colors = if settings.colorize {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        sinks.push(TermLogger::new(
            settings.level,
            config.clone(),
            TerminalMode::Mixed,
            colors,
        ));
    }

    if let Some(path) = settings.destination.file() {
        let file_level = match settings.destination {
            LogDestination::Both(_) => settings.level.max(LevelFilter::Debug),
            _ => settings.level,
        };
        match open_log_file(path) {
            Some(file) => sinks.push(WriteLogger::new(file_level, config, file)),
            None if sinks.is_empty() => return false,
            None => {}
        }
    }

    CombinedLogger::init(sinks).is_ok()
}

/// Installs a console logger for tests; later calls are no-ops.
pub fn initialize_for_tests() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Never,
    )]);
}

fn record_format() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .set_location_level(LevelFilter::Debug)
        .build()
}

fn open_log_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(err) = fs::create_dir_all(parent) {
            eprintln!("linkfetch: cannot create log directory {parent:?}: {err}");
            return None;
        }
    }
    File::create(path)
        .map_err(|err| eprintln!("linkfetch: cannot open log file {path:?}: {err}"))
        .ok()
}
