//! Herald Logging
//!
//! Installs a `tracing` subscriber configured from `HERALD_*` environment
//! variables. The dispatcher and broker crates log through `tracing` macros;
//! this crate decides where those records go.
//!
//! # Usage
//!
//! ```rust,no_run
//! herald_log::init().expect("logging already initialized");
//!
//! tracing::info!(event = "order.created", "Dispatching event");
//! ```
//!
//! # Environment Variables
//!
//! - `HERALD_DEBUG=1` - Enable debug logging
//! - `HERALD_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `HERALD_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `HERALD_LOG_COLOR=1|0` - Enable/disable colors
//! - `HERALD_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `HERALD_LOG_TARGET=1|0` - Include the module path
//!
//! `RUST_LOG`, when set, overrides the level with a full filter directive.

use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

// ============================================================================
// Log Levels
// ============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level (least verbose)
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Get level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    /// Filter directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl FromStr for Level {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "off" | "none" => Ok(Level::Off),
            _ => Err(LogError::InvalidLevel(s.to_string())),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human-readable format
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "compact" => Ok(Format::Compact),
            "json" => Ok(Format::Json),
            _ => Err(LogError::InvalidFormat(s.to_string())),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Logging setup errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Global configuration (lazy initialized).
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include module path
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false, // JSON output doesn't use colors
            timestamps: true,
            module_path: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.to_lowercase() == "true");

        let debug = flag("HERALD_DEBUG").unwrap_or(false);

        let level = lookup("HERALD_LOG_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("HERALD_LOG_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Format::Json);

        let color = flag("HERALD_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        let timestamps = flag("HERALD_LOG_TIMESTAMPS").unwrap_or(true);
        let module_path = flag("HERALD_LOG_TARGET").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            color,
            timestamps,
            module_path,
        }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }

    fn directive(&self) -> &'static str {
        if self.debug && self.level > Level::Debug {
            Level::Debug.as_directive()
        } else {
            self.level.as_directive()
        }
    }
}

/// Get the global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Subscriber Setup
// ============================================================================

/// Install the global subscriber using the environment configuration.
pub fn init() -> Result<(), LogError> {
    init_with(config())
}

/// Install the global subscriber using an explicit configuration.
///
/// Fails instead of panicking when a global subscriber already exists.
pub fn init_with(config: &LogConfig) -> Result<(), LogError> {
    tracing_subscriber::registry()
        .with(fmt_layer(config))
        .with(config.env_filter())
        .try_init()
        .map_err(|e| LogError::AlreadyInitialized(e.to_string()))
}

fn fmt_layer<S>(config: &LogConfig) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = fmt::layer()
        .with_target(config.module_path)
        .with_ansi(config.color && config.format != Format::Json);

    match (config.format, config.timestamps) {
        (Format::Json, true) => base.json().boxed(),
        (Format::Json, false) => base.json().without_time().boxed(),
        (Format::Compact, true) => base.compact().boxed(),
        (Format::Compact, false) => base.compact().without_time().boxed(),
        (Format::Pretty, true) => base.pretty().boxed(),
        (Format::Pretty, false) => base.pretty().without_time().boxed(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("DEBUG".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert!(matches!(
            "invalid".parse::<Level>(),
            Err(LogError::InvalidLevel(_))
        ));
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("pretty".parse::<Format>().unwrap(), Format::Pretty);
        assert_eq!("compact".parse::<Format>().unwrap(), Format::Compact);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert!("xml".parse::<Format>().is_err());
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = LogConfig::from_lookup(lookup(&[]));

        assert!(!config.debug);
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
        assert!(config.timestamps);
    }

    #[test]
    fn test_debug_raises_default_level() {
        let config = LogConfig::from_lookup(lookup(&[("HERALD_DEBUG", "true")]));
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("HERALD_DEBUG", "1"),
            ("HERALD_LOG_LEVEL", "error"),
        ]));
        assert_eq!(config.level, Level::Error);
        assert_eq!(config.directive(), "debug");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = LogConfig::from_lookup(lookup(&[
            ("HERALD_LOG_LEVEL", "warn"),
            ("HERALD_LOG_FORMAT", "compact"),
            ("HERALD_LOG_COLOR", "0"),
            ("HERALD_LOG_TIMESTAMPS", "false"),
            ("HERALD_LOG_TARGET", "0"),
        ]));

        assert_eq!(config.level, Level::Warn);
        assert_eq!(config.format, Format::Compact);
        assert!(!config.color);
        assert!(!config.timestamps);
        assert!(!config.module_path);
        assert_eq!(config.directive(), "warn");
    }

    #[test]
    fn test_init_twice_fails() {
        let config = LogConfig {
            format: Format::Compact,
            ..LogConfig::default()
        };

        let _ = init_with(&config);
        assert!(matches!(
            init_with(&config),
            Err(LogError::AlreadyInitialized(_))
        ));
    }
}
