use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BackupType, VersionRecord};

/// Aggregate storage figures over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_original_bytes: u64,
    pub total_stored_bytes: u64,
    pub total_space_saved: i64,
    pub deduplicated_backups: usize,
    pub savings_percent: f64,
    pub avg_compression_ratio: f64,
    pub last_backup_at: Option<DateTime<Utc>>,
}

impl BackupStats {
    /// Fold live (not logically deleted) versions created at or after `since`.
    pub fn from_versions<'a, I>(versions: I, since: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a VersionRecord>,
    {
        let mut stats = BackupStats::default();
        let mut ratio_sum = 0.0;
        let mut ratio_count = 0usize;

        for v in versions {
            if v.is_deleted || v.created_at < since {
                continue;
            }
            stats.total_backups += 1;
            stats.total_original_bytes += v.original_size;
            stats.total_stored_bytes += v.stored_size;
            stats.total_space_saved += v.space_saved;
            if v.backup_type == BackupType::Deduplicated {
                stats.deduplicated_backups += 1;
            } else {
                ratio_sum += v.compression_ratio;
                ratio_count += 1;
            }
            if stats.last_backup_at.map_or(true, |t| v.created_at > t) {
                stats.last_backup_at = Some(v.created_at);
            }
        }

        if stats.total_original_bytes > 0 {
            stats.savings_percent =
                stats.total_space_saved as f64 * 100.0 / stats.total_original_bytes as f64;
        }
        if ratio_count > 0 {
            stats.avg_compression_ratio = ratio_sum / ratio_count as f64;
        }
        stats
    }
}
