//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_core::BotProfile;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Update loop settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Per-language bot metadata published at startup.
    #[serde(default)]
    pub profiles: Vec<BotProfile>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to compact otherwise.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level: trace, debug, info, warn or error.
    pub level: String,

    pub format: LogFormat,

    pub output: LogOutput,

    /// Log file, required when `output` is `file`.
    pub file_path: Option<PathBuf>,

    /// Include thread ids in log lines.
    pub thread_ids: bool,

    /// Include source file and line in log lines.
    pub file_location: bool,

    pub span_events: SpanEventConfig,

    /// Per-target level overrides, e.g. `courier_framework = "debug"`.
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Update loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of updates dispatched concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Maximum number of updates pulled from the stream but not yet
    /// finished, including those queued behind their chat.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// How long shutdown waits for in-flight dispatches.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Publish registered commands to the transport at startup.
    #[serde(default = "default_sync_commands")]
    pub sync_commands: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_pending: default_max_pending(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            sync_commands: default_sync_commands(),
        }
    }
}

impl DispatchConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_max_in_flight() -> usize {
    64
}

fn default_max_pending() -> usize {
    1024
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_sync_commands() -> bool {
    true
}
