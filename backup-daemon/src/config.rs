use std::path::{Path, PathBuf};

use backup_engine::config::{
    EngineSettings, MonitorPathConfig, MonitorSettings, PathClass, RetentionPolicy,
};
use backup_engine::watch::cloud::default_sync_folder;
use ::config::{Config, Environment, File};
use serde::Deserialize;

const ENV_PREFIX: &str = "BACKUP_DAEMON";
const DEFAULT_CONFIG_NAME: &str = "backup-daemon";

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub log: LogSection,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub retention: RetentionSection,

    #[serde(default)]
    pub paths: Vec<MonitorPathConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Defaults to `<data_dir>/backup-daemon.db`
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
        }
    }
}

impl DaemonSection {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backup-daemon.db"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSection {
    /// Six-field cron expression (seconds first). Empty disables the sweep.
    #[serde(default = "default_retention_schedule")]
    pub schedule: String,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_min_versions")]
    pub min_versions: usize,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            schedule: default_retention_schedule(),
            retention_days: default_retention_days(),
            min_versions: default_min_versions(),
        }
    }
}

impl RetentionSection {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention_days: self.retention_days,
            min_versions: self.min_versions,
        }
    }
}

impl DaemonConfig {
    /// Load `path` (or `./backup-daemon.toml` when present), then apply
    /// `BACKUP_DAEMON__<SECTION>__<KEY>` overrides. A `.env` file is read
    /// first so it can supply those overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config: DaemonConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Path entries with per-path retention overrides.
    pub fn retention_overrides(&self) -> Vec<(String, RetentionPolicy)> {
        self.paths
            .iter()
            .filter_map(|p| p.retention.map(|r| (p.id.clone(), r)))
            .collect()
    }
}

/// Fill in the provider sync folder for cloud entries that leave
/// `location` empty.
pub fn resolve_cloud_locations(paths: &mut [MonitorPathConfig], home: Option<&Path>) {
    for path in paths.iter_mut() {
        if path.class != PathClass::Cloud || !path.location.as_os_str().is_empty() {
            continue;
        }
        match home {
            Some(home) => {
                path.location = default_sync_folder(home);
                tracing::info!(
                    path_id = %path.id,
                    location = %path.location.display(),
                    "Resolved cloud sync folder"
                );
            }
            None => tracing::warn!(path_id = %path.id, "No home directory to resolve cloud folder"),
        }
    }
}

// Default values
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retention_schedule() -> String {
    "0 0 3 * * *".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_min_versions() -> usize {
    5
}
