use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// How a version was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    Full,
    Incremental,
    Deduplicated,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "FULL",
            BackupType::Incremental => "INCREMENTAL",
            BackupType::Deduplicated => "DEDUPLICATED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FULL" => Some(BackupType::Full),
            "INCREMENTAL" => Some(BackupType::Incremental),
            "DEDUPLICATED" => Some(BackupType::Deduplicated),
            _ => None,
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec an artifact was written with. The artifact file extension carries
/// the same tag so a restore can dispatch without the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgo {
    Zstd,
    Gzip,
    None,
}

impl CompressionAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgo::Zstd => "zstd",
            CompressionAlgo::Gzip => "gzip",
            CompressionAlgo::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "zstd" => Some(CompressionAlgo::Zstd),
            "gzip" => Some(CompressionAlgo::Gzip),
            "none" => Some(CompressionAlgo::None),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CompressionAlgo::Zstd => "zst",
            CompressionAlgo::Gzip => "gz",
            CompressionAlgo::None => "raw",
        }
    }

    /// Recover the codec from an artifact's extension tag.
    pub fn from_artifact_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "zst" => Some(CompressionAlgo::Zstd),
            "gz" => Some(CompressionAlgo::Gzip),
            "raw" => Some(CompressionAlgo::None),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored version of one file. Never mutated after creation except for the
/// logical `is_deleted` flag set by the retention sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: String,
    pub path_id: String,
    pub file_path: PathBuf,
    /// Artifact to restore from; for deduplicated versions this is the
    /// artifact of the version whose content matched
    pub artifact_path: PathBuf,
    pub version_tag: String,
    pub original_size: u64,
    pub stored_size: u64,
    pub space_saved: i64,
    pub compression_ratio: f64,
    pub backup_type: BackupType,
    pub compression_algo: CompressionAlgo,
    pub content_hash: String,
    pub is_deduplicated: bool,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Time-ordered version tag, e.g. `20261019_142501_123`.
pub fn version_tag(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Percentage of bytes saved by storage, clamped to `[0, 100]`.
pub fn compression_ratio(original_size: u64, stored_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    let saved = original_size as f64 - stored_size as f64;
    (saved * 100.0 / original_size as f64).clamp(0.0, 100.0)
}
