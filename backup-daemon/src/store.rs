//! `PersistenceStore` over a pooled SQLite database.
//!
//! Every call checks out a connection and blocks; the engine drives it from
//! the blocking pool.

use std::path::PathBuf;

use backup_engine::config::MonitorPathConfig;
use backup_engine::models::{
    BackupJob, BackupStats, BackupType, ChangeEvent, CompressionAlgo, EventSource, FileAction,
    JobStatus, VersionRecord,
};
use backup_engine::persistence::PersistenceStore;
use backup_engine::PersistenceError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::db::connection::DbPool;

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> anyhow::Result<T>) -> Result<T, PersistenceError> {
        let conn = self.pool.get().map_err(anyhow::Error::from)?;
        Ok(f(&conn)?)
    }
}

/// Fixed-width UTC so text order matches time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(col: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, message.into())
}

fn get_ts(row: &Row, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(row.as_ref().column_index(col).unwrap_or(0), format!("{col}: {e}")))
}

fn get_enum<T>(row: &Row, col: &str, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    parse(&raw).ok_or_else(|| {
        conversion_error(
            row.as_ref().column_index(col).unwrap_or(0),
            format!("{col}: unknown value {raw:?}"),
        )
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<ChangeEvent> {
    Ok(ChangeEvent {
        path_id: row.get("path_id")?,
        full_path: PathBuf::from(row.get::<_, String>("full_path")?),
        file_name: row.get("file_name")?,
        action: get_enum(row, "action", FileAction::parse)?,
        size: row.get::<_, i64>("size")?.max(0) as u64,
        source: get_enum(row, "source", EventSource::parse)?,
        timestamp: get_ts(row, "timestamp")?,
    })
}

fn row_to_version(row: &Row) -> rusqlite::Result<VersionRecord> {
    Ok(VersionRecord {
        id: row.get("id")?,
        path_id: row.get("path_id")?,
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        artifact_path: PathBuf::from(row.get::<_, String>("artifact_path")?),
        version_tag: row.get("version_tag")?,
        original_size: row.get::<_, i64>("original_size")?.max(0) as u64,
        stored_size: row.get::<_, i64>("stored_size")?.max(0) as u64,
        space_saved: row.get("space_saved")?,
        compression_ratio: row.get("compression_ratio")?,
        backup_type: get_enum(row, "backup_type", BackupType::parse)?,
        compression_algo: get_enum(row, "compression_algo", CompressionAlgo::parse)?,
        content_hash: row.get("content_hash")?,
        is_deduplicated: row.get::<_, i64>("is_deduplicated")? != 0,
        duration_ms: row.get::<_, i64>("duration_ms")?.max(0) as u64,
        created_at: get_ts(row, "created_at")?,
        is_deleted: row.get::<_, i64>("is_deleted")? != 0,
    })
}

impl PersistenceStore for SqliteStore {
    fn add_or_update_path(&self, config: &MonitorPathConfig) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(config).map_err(anyhow::Error::from)?;
        let class = serde_json::to_value(config.class).map_err(anyhow::Error::from)?;
        let now = ts(&Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO monitor_paths
                   (id, name, location, backup_location, class, method, enabled, recursive, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   location = excluded.location,
                   backup_location = excluded.backup_location,
                   class = excluded.class,
                   method = excluded.method,
                   enabled = excluded.enabled,
                   recursive = excluded.recursive,
                   config = excluded.config,
                   updated_at = excluded.updated_at",
                params![
                    config.id,
                    config.name,
                    config.location.to_string_lossy(),
                    config.backup_location.to_string_lossy(),
                    class.as_str().unwrap_or("local"),
                    config.method.as_str(),
                    config.enabled,
                    config.recursive,
                    json,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    fn log_event(&self, event: &ChangeEvent) -> Result<(), PersistenceError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_events (path_id, full_path, file_name, action, size, source, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.path_id,
                    event.full_path.to_string_lossy(),
                    event.file_name,
                    event.action.as_str(),
                    event.size as i64,
                    event.source.as_str(),
                    ts(&event.timestamp),
                ],
            )?;
            Ok(())
        })
    }

    fn log_version(&self, version: &VersionRecord) -> Result<(), PersistenceError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_versions
                   (id, path_id, file_path, artifact_path, version_tag, original_size, stored_size,
                    space_saved, compression_ratio, backup_type, compression_algo, content_hash,
                    is_deduplicated, duration_ms, created_at, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    version.id,
                    version.path_id,
                    version.file_path.to_string_lossy(),
                    version.artifact_path.to_string_lossy(),
                    version.version_tag,
                    version.original_size as i64,
                    version.stored_size as i64,
                    version.space_saved,
                    version.compression_ratio,
                    version.backup_type.as_str(),
                    version.compression_algo.as_str(),
                    version.content_hash,
                    version.is_deduplicated,
                    version.duration_ms as i64,
                    ts(&version.created_at),
                    version.is_deleted,
                ],
            )?;
            Ok(())
        })
    }

    fn record_job(&self, job: &BackupJob) -> Result<(), PersistenceError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO backup_jobs
                   (job_id, path_id, backup_type, started_at, finished_at, files_processed,
                    files_failed, total_size, status, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.job_id,
                    job.path_id,
                    job.backup_type.map(|t| t.as_str()),
                    ts(&job.started_at),
                    ts(&job.finished_at),
                    job.files_processed,
                    job.files_failed,
                    job.total_size as i64,
                    job.status.as_str(),
                    job.error,
                ],
            )?;
            Ok(())
        })
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<ChangeEvent>, PersistenceError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM file_events ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], row_to_event)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn stats_since(&self, window: chrono::Duration) -> Result<BackupStats, PersistenceError> {
        let since = Utc::now() - window;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM file_versions WHERE is_deleted = 0 AND created_at >= ?1",
            )?;
            let versions = stmt
                .query_map(params![ts(&since)], row_to_version)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(BackupStats::from_versions(&versions, since))
        })
    }

    fn list_versions(&self, path_id: Option<&str>) -> Result<Vec<VersionRecord>, PersistenceError> {
        self.with_conn(|conn| {
            let versions = match path_id {
                Some(id) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM file_versions WHERE path_id = ?1 ORDER BY created_at ASC, rowid ASC",
                    )?;
                    let rows = stmt.query_map(params![id], row_to_version)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt =
                        conn.prepare("SELECT * FROM file_versions ORDER BY created_at ASC, rowid ASC")?;
                    let rows = stmt.query_map([], row_to_version)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(versions)
        })
    }

    fn find_version(&self, id: &str) -> Result<Option<VersionRecord>, PersistenceError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM file_versions WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id], row_to_version)?;
            Ok(rows.next().transpose()?)
        })
    }

    fn mark_versions_deleted(&self, ids: &[String]) -> Result<usize, PersistenceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let mut changed = 0;
            // Bound parameter lists stay well under SQLite's variable limit
            for chunk in ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "UPDATE file_versions SET is_deleted = 1 WHERE is_deleted = 0 AND id IN ({placeholders})"
                );
                changed += conn.execute(&sql, params_from_iter(chunk.iter()))?;
            }
            Ok(changed)
        })
    }
}

/// Job rows for one path, newest first.
pub fn jobs_for_path(store: &SqliteStore, path_id: &str) -> Result<Vec<BackupJob>, PersistenceError> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM backup_jobs WHERE path_id = ?1 ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map(params![path_id], |row| {
            Ok(BackupJob {
                job_id: row.get("job_id")?,
                path_id: row.get("path_id")?,
                backup_type: row
                    .get::<_, Option<String>>("backup_type")?
                    .and_then(|t| BackupType::parse(&t)),
                started_at: get_ts(row, "started_at")?,
                finished_at: get_ts(row, "finished_at")?,
                files_processed: row.get("files_processed")?,
                files_failed: row.get("files_failed")?,
                total_size: row.get::<_, i64>("total_size")?.max(0) as u64,
                status: get_enum(row, "status", JobStatus::parse)?,
                error: row.get("error")?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
}
