//! Configuration types for monitored paths and the engine.
//!
//! All structs deserialize from TOML with defaults for every optional key, so
//! a minimal `[[paths]]` entry only needs `id`, `name`, `location` and
//! `backup_location`.

use crate::models::CompressionAlgo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where a monitored directory lives. Drives the default cadence choices of
/// the daemon but never the backend selection on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathClass {
    #[default]
    Local,
    Network,
    Cloud,
}

/// Change detection method requested for a path.
///
/// `Default` is never run directly: the orchestrator substitutes its current
/// global method at the moment the path is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchMethod {
    Native,
    CooperativeWatch,
    Polling,
    CloudPoll,
    #[default]
    Default,
}

impl WatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchMethod::Native => "NATIVE",
            WatchMethod::CooperativeWatch => "COOPERATIVE_WATCH",
            WatchMethod::Polling => "POLLING",
            WatchMethod::CloudPoll => "CLOUD_POLL",
            WatchMethod::Default => "DEFAULT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NATIVE" => Some(WatchMethod::Native),
            "COOPERATIVE_WATCH" | "COOPERATIVE" => Some(WatchMethod::CooperativeWatch),
            "POLLING" => Some(WatchMethod::Polling),
            "CLOUD_POLL" | "CLOUD" => Some(WatchMethod::CloudPoll),
            "DEFAULT" => Some(WatchMethod::Default),
            _ => None,
        }
    }
}

impl fmt::Display for WatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-path storage optimisations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationFlags {
    #[serde(default = "default_true")]
    pub compression: bool,

    #[serde(default = "default_true")]
    pub deduplication: bool,

    #[serde(default = "default_true")]
    pub incremental: bool,
}

impl Default for OptimizationFlags {
    fn default() -> Self {
        Self {
            compression: true,
            deduplication: true,
            incremental: true,
        }
    }
}

/// When old versions become eligible for logical deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Versions older than this many days may be marked deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Newest versions per file that are always kept
    #[serde(default = "default_min_versions")]
    pub min_versions: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            min_versions: default_min_versions(),
        }
    }
}

/// One monitored directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorPathConfig {
    /// Stable identifier, used as the key everywhere
    pub id: String,

    /// Display name
    pub name: String,

    /// Directory to watch
    #[serde(default)]
    pub location: PathBuf,

    /// Directory that receives stored artifacts
    pub backup_location: PathBuf,

    #[serde(default)]
    pub class: PathClass,

    #[serde(default)]
    pub method: WatchMethod,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Watch nested directories too
    #[serde(default)]
    pub recursive: bool,

    #[serde(default)]
    pub optimization: OptimizationFlags,

    /// Overrides the process-wide retention policy
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
}

impl MonitorPathConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<PathBuf>,
        backup_location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
            backup_location: backup_location.into(),
            class: PathClass::Local,
            method: WatchMethod::Default,
            enabled: true,
            recursive: false,
            optimization: OptimizationFlags::default(),
            retention: None,
        }
    }

    pub fn with_method(mut self, method: WatchMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_optimization(mut self, optimization: OptimizationFlags) -> Self {
        self.optimization = optimization;
        self
    }
}

/// Orchestrator and pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Method substituted for paths configured as `default`
    #[serde(default = "default_global_method")]
    pub global_method: WatchMethod,

    #[serde(default = "default_cooperative_interval_ms")]
    pub cooperative_interval_ms: u64,

    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    #[serde(default = "default_cloud_interval_ms")]
    pub cloud_interval_ms: u64,

    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,

    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,

    /// Bounded queue between each backend and the orchestrator
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Size of the shared backup worker pool
    #[serde(default = "default_max_concurrent_backups")]
    pub max_concurrent_backups: usize,

    /// Extra file names the noise filter drops, matched exactly
    #[serde(default)]
    pub ignored_names: Vec<String>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            global_method: default_global_method(),
            cooperative_interval_ms: default_cooperative_interval_ms(),
            polling_interval_ms: default_polling_interval_ms(),
            cloud_interval_ms: default_cloud_interval_ms(),
            debounce_window_ms: default_debounce_window_ms(),
            startup_grace_ms: default_startup_grace_ms(),
            channel_capacity: default_channel_capacity(),
            max_concurrent_backups: default_max_concurrent_backups(),
            ignored_names: Vec::new(),
        }
    }
}

impl MonitorSettings {
    /// Never zero; a zero tick period is rejected by the timer.
    pub fn cooperative_interval(&self) -> Duration {
        Duration::from_millis(self.cooperative_interval_ms.max(MIN_INTERVAL_MS))
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.max(MIN_INTERVAL_MS))
    }

    /// Cloud cadence, clamped to 5–30 seconds.
    pub fn cloud_interval(&self) -> Duration {
        Duration::from_millis(
            self.cloud_interval_ms
                .clamp(CLOUD_INTERVAL_MIN_MS, CLOUD_INTERVAL_MAX_MS),
        )
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

/// Codec choice shared by every path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_compression")]
    pub compression: CompressionAlgo,

    /// 1 (fastest) to 9 (smallest)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            compression_level: default_compression_level(),
        }
    }
}

impl EngineSettings {
    pub fn level(&self) -> u32 {
        self.compression_level.clamp(1, 9)
    }
}

pub const MIN_INTERVAL_MS: u64 = 1;
pub const CLOUD_INTERVAL_MIN_MS: u64 = 5_000;
pub const CLOUD_INTERVAL_MAX_MS: u64 = 30_000;

// Default values
fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_min_versions() -> usize {
    5
}

fn default_global_method() -> WatchMethod {
    WatchMethod::CooperativeWatch
}

fn default_cooperative_interval_ms() -> u64 {
    5_000
}

fn default_polling_interval_ms() -> u64 {
    3_000
}

fn default_cloud_interval_ms() -> u64 {
    10_000
}

fn default_debounce_window_ms() -> u64 {
    1_000
}

fn default_startup_grace_ms() -> u64 {
    2_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_max_concurrent_backups() -> usize {
    4
}

fn default_compression() -> CompressionAlgo {
    CompressionAlgo::Zstd
}

fn default_compression_level() -> u32 {
    6
}
