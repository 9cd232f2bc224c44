//! Dispatcher configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;

/// How one dispatch fans out to its handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Invoke handlers one after another on the calling task, in
    /// registration order
    Sequential,
    /// Spawn every handler as its own task and join on all completions
    #[default]
    Concurrent,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" | "sync" => Ok(DispatchMode::Sequential),
            "concurrent" | "async" => Ok(DispatchMode::Concurrent),
            other => Err(format!("unknown dispatch mode: {}", other)),
        }
    }
}

/// What a dispatch does when a handler fails or panics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultPolicy {
    /// Log and count failures; the dispatch still succeeds
    #[default]
    Isolate,
    /// Surface failures to the dispatch caller
    Propagate,
}

impl FromStr for FaultPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "isolate" => Ok(FaultPolicy::Isolate),
            "propagate" => Ok(FaultPolicy::Propagate),
            other => Err(format!("unknown fault policy: {}", other)),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Fan-out mode
    pub mode: DispatchMode,

    /// Handler fault handling
    pub fault_policy: FaultPolicy,

    /// Enable event logging
    pub enable_logging: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            fault_policy: FaultPolicy::default(),
            enable_logging: true,
        }
    }
}

impl DispatcherConfig {
    /// Create config from environment variables.
    ///
    /// - `HERALD_DISPATCH_MODE=sequential|concurrent`
    /// - `HERALD_FAULT_POLICY=isolate|propagate`
    /// - `HERALD_DISPATCH_LOGGING=1|0`
    ///
    /// Unset or unrecognized values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mode = parse_or(&lookup, "HERALD_DISPATCH_MODE", defaults.mode);
        let fault_policy = parse_or(&lookup, "HERALD_FAULT_POLICY", defaults.fault_policy);
        let enable_logging = lookup("HERALD_DISPATCH_LOGGING")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(defaults.enable_logging);

        Self {
            mode,
            fault_policy,
            enable_logging,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr<Err = String>,
{
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(key, error = %e, "Ignoring invalid dispatcher setting");
            default
        }),
        None => default,
    }
}
