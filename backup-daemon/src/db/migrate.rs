use crate::db::connection::DbPool;
use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS monitor_paths (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  location TEXT NOT NULL,
  backup_location TEXT NOT NULL,
  class TEXT NOT NULL DEFAULT 'local',
  method TEXT NOT NULL DEFAULT 'DEFAULT',
  enabled INTEGER NOT NULL DEFAULT 1,
  recursive INTEGER NOT NULL DEFAULT 0,
  config TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
  updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS file_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  path_id TEXT NOT NULL,
  full_path TEXT NOT NULL,
  file_name TEXT NOT NULL,
  action TEXT NOT NULL CHECK(action IN ('CREATE','MODIFY','DELETE','RENAME')),
  size INTEGER NOT NULL DEFAULT 0,
  source TEXT NOT NULL,
  timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_versions (
  id TEXT PRIMARY KEY,
  path_id TEXT NOT NULL,
  file_path TEXT NOT NULL,
  artifact_path TEXT NOT NULL,
  version_tag TEXT NOT NULL,
  original_size INTEGER NOT NULL,
  stored_size INTEGER NOT NULL,
  space_saved INTEGER NOT NULL,
  compression_ratio REAL NOT NULL,
  backup_type TEXT NOT NULL CHECK(backup_type IN ('FULL','INCREMENTAL','DEDUPLICATED')),
  compression_algo TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  is_deduplicated INTEGER NOT NULL DEFAULT 0,
  duration_ms INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS backup_jobs (
  job_id TEXT PRIMARY KEY,
  path_id TEXT NOT NULL,
  backup_type TEXT,
  started_at TEXT NOT NULL,
  finished_at TEXT NOT NULL,
  files_processed INTEGER NOT NULL DEFAULT 0,
  files_failed INTEGER NOT NULL DEFAULT 0,
  total_size INTEGER NOT NULL DEFAULT 0,
  status TEXT NOT NULL CHECK(status IN ('COMPLETED','FAILED')),
  error TEXT
);

CREATE INDEX IF NOT EXISTS idx_file_events_timestamp ON file_events(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_file_versions_path ON file_versions(path_id, file_path);
CREATE INDEX IF NOT EXISTS idx_file_versions_hash ON file_versions(content_hash);
CREATE INDEX IF NOT EXISTS idx_file_versions_created ON file_versions(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_backup_jobs_path ON backup_jobs(path_id);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Columns added after the first schema
    if !has_column(&conn, "file_versions", "is_deleted")? {
        conn.execute_batch(
            "ALTER TABLE file_versions ADD COLUMN is_deleted INTEGER NOT NULL DEFAULT 0",
        )?;
    }
    if !has_column(&conn, "monitor_paths", "recursive")? {
        conn.execute_batch(
            "ALTER TABLE monitor_paths ADD COLUMN recursive INTEGER NOT NULL DEFAULT 0",
        )?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect::<Vec<_>>();
    Ok(columns.iter().any(|c| c == column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use tempfile::TempDir;

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(dir.path().join("test.db").to_str().unwrap()).unwrap();

        migrate(&pool).unwrap();
        migrate(&pool).unwrap();

        let conn = pool.get().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('monitor_paths', 'file_events', 'file_versions', 'backup_jobs')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
        assert!(has_column(&conn, "file_versions", "is_deleted").unwrap());
        assert!(has_column(&conn, "monitor_paths", "recursive").unwrap());
    }
}
