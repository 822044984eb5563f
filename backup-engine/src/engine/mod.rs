//! Content-addressed backup engine.
//!
//! Turns one changed file into one stored version:
//! - hash the content, and reuse an existing artifact when the hash is known
//! - index new artifacts under the hash of the bytes actually encoded, so a
//!   file rewritten between hashing and storing never poisons the index
//! - store MODIFY events for a path with a prior artifact through the
//!   incremental policy
//! - otherwise write a full compressed copy and index its hash
//!
//! Every call records exactly one [`BackupJob`](crate::models::BackupJob),
//! completed or failed.

pub mod codec;
pub mod dedup;
pub mod hash;
pub mod incremental;
pub mod retention;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EngineSettings, MonitorPathConfig};
use crate::models::{
    compression_ratio, version_tag, BackupType, CompressionAlgo, FileAction, JobClock,
    VersionRecord,
};
use crate::persistence::{record, run_blocking, SharedStore};
use crate::utils::errors::{BackupError, PersistenceError, RestoreError};
use crate::utils::format::{format_bytes, format_signed_bytes};

pub use codec::WrittenArtifact;
pub use dedup::{DeduplicationIndex, StoredArtifact};
pub use incremental::{IncrementalPolicy, RecompressPolicy};

pub struct BackupEngine {
    settings: EngineSettings,
    index: DeduplicationIndex,
    /// Last artifact written per monitored path
    last_artifacts: Mutex<HashMap<String, StoredArtifact>>,
    policy: Arc<dyn IncrementalPolicy>,
    store: SharedStore,
}

impl BackupEngine {
    pub fn new(settings: EngineSettings, store: SharedStore) -> Self {
        Self {
            settings,
            index: DeduplicationIndex::new(),
            last_artifacts: Mutex::new(HashMap::new()),
            policy: Arc::new(RecompressPolicy),
            store,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn IncrementalPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn index(&self) -> &DeduplicationIndex {
        &self.index
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Rebuild the dedup index and the last-artifact map from persisted
    /// versions.
    pub async fn reload_index(&self) -> Result<usize, PersistenceError> {
        let versions = run_blocking(&self.store, |s| s.list_versions(None)).await?;
        let loaded = self.index.reload(&versions);

        if let Ok(mut last) = self.last_artifacts.lock() {
            for v in versions.iter().filter(|v| !v.is_deleted && !v.is_deduplicated) {
                if v.artifact_path.is_file() {
                    last.insert(
                        v.path_id.clone(),
                        StoredArtifact {
                            path: v.artifact_path.clone(),
                            algo: v.compression_algo,
                            stored_size: v.stored_size,
                        },
                    );
                }
            }
        }
        Ok(loaded)
    }

    /// Store one version of `source` for `config`. The resulting version and
    /// job are persisted before returning.
    pub async fn process(
        &self,
        config: &MonitorPathConfig,
        source: &Path,
        action: FileAction,
    ) -> Result<VersionRecord, BackupError> {
        let clock = JobClock::start(&config.id);
        let result = self.backup(config, source, action).await;

        let job = match &result {
            Ok(version) => {
                let logged = version.clone();
                record(&self.store, "log_version", move |s| s.log_version(&logged)).await;
                clock.completed(version.backup_type, version.original_size)
            }
            Err(e) => {
                warn!(path_id = %config.id, file = %source.display(), "Backup failed: {}", e);
                clock.failed(e.to_string())
            }
        };
        record(&self.store, "record_job", move |s| s.record_job(&job)).await;

        result
    }

    async fn backup(
        &self,
        config: &MonitorPathConfig,
        source: &Path,
        action: FileAction,
    ) -> Result<VersionRecord, BackupError> {
        let started = Instant::now();

        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| BackupError::InvalidSource {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !meta.is_file() {
            return Err(BackupError::InvalidSource {
                path: source.to_path_buf(),
                reason: "not a regular file".into(),
            });
        }
        let content_hash = hash::hash_file_async(source.to_path_buf()).await?;
        let created_at = Utc::now();
        let id = Uuid::new_v4().to_string();
        let tag = version_tag(created_at);

        if config.optimization.deduplication {
            if let Some(existing) = self.index.lookup(&content_hash) {
                let original_size = meta.len();
                debug!(path_id = %config.id, hash = %content_hash, "content already stored");
                let version = VersionRecord {
                    id,
                    path_id: config.id.clone(),
                    file_path: source.to_path_buf(),
                    artifact_path: existing.path,
                    version_tag: tag,
                    original_size,
                    stored_size: 0,
                    space_saved: original_size as i64,
                    compression_ratio: 100.0,
                    backup_type: BackupType::Deduplicated,
                    compression_algo: existing.algo,
                    content_hash,
                    is_deduplicated: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                    created_at,
                    is_deleted: false,
                };
                info!(
                    path_id = %config.id,
                    file = %source.display(),
                    "Deduplicated {}",
                    format_bytes(original_size)
                );
                return Ok(version);
            }
        }

        let algo = if config.optimization.compression {
            self.settings.compression
        } else {
            CompressionAlgo::None
        };
        let level = self.settings.level();

        tokio::fs::create_dir_all(&config.backup_location).await?;
        let artifact_path = config
            .backup_location
            .join(artifact_name(source, &tag, &id, algo));

        let previous = if config.optimization.incremental && action == FileAction::Modify {
            self.last_artifact(&config.id)
        } else {
            None
        };

        let (backup_type, written) = match previous {
            Some(previous) => {
                debug!(policy = self.policy.name(), previous = %previous.path.display(), "incremental store");
                let written = self
                    .policy
                    .store(source, &previous, &artifact_path, algo, level)
                    .await?;
                (BackupType::Incremental, written)
            }
            None => {
                let written = codec::write_artifact(source, &artifact_path, algo, level).await?;
                (BackupType::Full, written)
            }
        };
        let WrittenArtifact {
            stored_size,
            original_size,
            content_hash: stored_hash,
        } = written;
        if stored_hash != content_hash {
            debug!(
                path_id = %config.id,
                file = %source.display(),
                "content changed while storing; indexing the stored bytes"
            );
        }

        let stored = StoredArtifact {
            path: artifact_path.clone(),
            algo,
            stored_size,
        };
        self.index.register(&stored_hash, stored.clone());
        if let Ok(mut last) = self.last_artifacts.lock() {
            last.insert(config.id.clone(), stored);
        }

        let version = VersionRecord {
            id,
            path_id: config.id.clone(),
            file_path: source.to_path_buf(),
            artifact_path,
            version_tag: tag,
            original_size,
            stored_size,
            space_saved: original_size as i64 - stored_size as i64,
            compression_ratio: compression_ratio(original_size, stored_size),
            backup_type,
            compression_algo: algo,
            content_hash: stored_hash,
            is_deduplicated: false,
            duration_ms: started.elapsed().as_millis() as u64,
            created_at,
            is_deleted: false,
        };
        info!(
            path_id = %config.id,
            file = %source.display(),
            "Stored {} version: {} -> {} ({} saved, {:.1}%)",
            backup_type,
            format_bytes(original_size),
            format_bytes(stored_size),
            format_signed_bytes(version.space_saved),
            version.compression_ratio
        );
        Ok(version)
    }

    fn last_artifact(&self, path_id: &str) -> Option<StoredArtifact> {
        let last = self.last_artifacts.lock().ok()?;
        last.get(path_id).filter(|a| a.path.is_file()).cloned()
    }

    /// Materialise `version` into `dest_dir` under its original file name.
    pub async fn restore(
        &self,
        version: &VersionRecord,
        dest_dir: &Path,
    ) -> Result<PathBuf, RestoreError> {
        let algo = CompressionAlgo::from_artifact_path(&version.artifact_path)
            .ok_or_else(|| RestoreError::UnrecognizedFormat(version.artifact_path.clone()))?;

        if !tokio::fs::try_exists(&version.artifact_path).await.unwrap_or(false) {
            return Err(RestoreError::ArtifactMissing(version.artifact_path.clone()));
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| RestoreError::DestinationUnwritable {
                path: dest_dir.to_path_buf(),
                reason: e.to_string(),
            })?;

        let file_name = version
            .file_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| version.version_tag.clone().into());
        let dest = dest_dir.join(file_name);

        let written = codec::read_artifact(&version.artifact_path, &dest, algo).await?;
        info!(
            version = %version.id,
            dest = %dest.display(),
            "Restored {} bytes",
            written
        );
        Ok(dest)
    }
}

/// `<stem>_<versionTag>_<short-id><ext>.<tag>`
fn artifact_name(source: &Path, tag: &str, id: &str, algo: CompressionAlgo) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let short: String = id.chars().take(8).collect();
    format!("{stem}_{tag}_{short}{ext}.{}", algo.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationFlags;
    use crate::models::JobStatus;
    use crate::persistence::{InMemoryStore, PersistenceStore};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        watched: PathBuf,
        config: MonitorPathConfig,
        memory: Arc<InMemoryStore>,
        engine: BackupEngine,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("watched");
        std::fs::create_dir_all(&watched).unwrap();
        let config = MonitorPathConfig::new("docs", "Docs", &watched, dir.path().join("backup"));
        let memory = Arc::new(InMemoryStore::new());
        let engine = BackupEngine::new(EngineSettings::default(), memory.clone());
        Fixture {
            dir,
            watched,
            config,
            memory,
            engine,
        }
    }

    #[test]
    fn test_artifact_name_layout() {
        let name = artifact_name(
            Path::new("/data/report.docx"),
            "20260102_030405_000",
            "abcdef0123456789",
            CompressionAlgo::Zstd,
        );
        assert_eq!(name, "report_20260102_030405_000_abcdef01.docx.zst");

        let bare = artifact_name(Path::new("/data/Makefile"), "t", "12345678", CompressionAlgo::None);
        assert_eq!(bare, "Makefile_t_12345678.raw");
    }

    #[tokio::test]
    async fn test_full_then_dedup_then_incremental() {
        let fx = fixture();
        let a = fx.watched.join("a.txt");
        let b = fx.watched.join("b.txt");
        let content = "line of text\n".repeat(200);
        tokio::fs::write(&a, &content).await.unwrap();
        tokio::fs::write(&b, &content).await.unwrap();

        let first = fx.engine.process(&fx.config, &a, FileAction::Create).await.unwrap();
        assert_eq!(first.backup_type, BackupType::Full);
        assert!(first.stored_size > 0);
        assert!(first.artifact_path.is_file());
        assert_eq!(first.space_saved, first.original_size as i64 - first.stored_size as i64);

        let dup = fx.engine.process(&fx.config, &b, FileAction::Create).await.unwrap();
        assert_eq!(dup.backup_type, BackupType::Deduplicated);
        assert_eq!(dup.stored_size, 0);
        assert_eq!(dup.space_saved, dup.original_size as i64);
        assert_eq!(dup.artifact_path, first.artifact_path);
        assert!(dup.is_deduplicated);

        tokio::fs::write(&a, "changed content\n".repeat(100)).await.unwrap();
        let modified = fx.engine.process(&fx.config, &a, FileAction::Modify).await.unwrap();
        assert_eq!(modified.backup_type, BackupType::Incremental);
        assert!((0.0..=100.0).contains(&modified.compression_ratio));

        let jobs = fx.memory.jobs();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
        assert_eq!(fx.memory.list_versions(Some("docs")).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_source_records_failed_job() {
        let fx = fixture();
        let err = fx
            .engine
            .process(&fx.config, &fx.watched.join("vanished.txt"), FileAction::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::InvalidSource { .. }));

        let jobs = fx.memory.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!((jobs[0].files_processed, jobs[0].files_failed), (0, 1));
        assert!(fx.memory.list_versions(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_invalid_source() {
        let fx = fixture();
        let err = fx
            .engine
            .process(&fx.config, &fx.watched, FileAction::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::InvalidSource { .. }));
    }

    #[tokio::test]
    async fn test_flags_disable_dedup_incremental_and_compression() {
        let mut fx = fixture();
        fx.config = fx.config.clone().with_optimization(OptimizationFlags {
            compression: false,
            deduplication: false,
            incremental: false,
        });
        let a = fx.watched.join("a.txt");
        tokio::fs::write(&a, b"same").await.unwrap();

        let first = fx.engine.process(&fx.config, &a, FileAction::Create).await.unwrap();
        let second = fx.engine.process(&fx.config, &a, FileAction::Modify).await.unwrap();

        assert_eq!(first.backup_type, BackupType::Full);
        assert_eq!(second.backup_type, BackupType::Full);
        assert_eq!(second.compression_algo, CompressionAlgo::None);
        assert_eq!(second.artifact_path.extension().unwrap(), "raw");
        assert_ne!(first.artifact_path, second.artifact_path);
    }

    #[tokio::test]
    async fn test_restore_round_trip_and_dedup_pointer() {
        let fx = fixture();
        let a = fx.watched.join("notes.md");
        let b = fx.watched.join("copy.md");
        let content = b"# Notes\n\nsome markdown body\n".repeat(50);
        tokio::fs::write(&a, &content).await.unwrap();
        tokio::fs::write(&b, &content).await.unwrap();

        let full = fx.engine.process(&fx.config, &a, FileAction::Create).await.unwrap();
        let dup = fx.engine.process(&fx.config, &b, FileAction::Create).await.unwrap();

        let out = fx.dir.path().join("restore");
        let restored = fx.engine.restore(&full, &out).await.unwrap();
        assert_eq!(restored, out.join("notes.md"));
        assert_eq!(tokio::fs::read(&restored).await.unwrap(), content);

        let restored_dup = fx.engine.restore(&dup, &out).await.unwrap();
        assert_eq!(restored_dup, out.join("copy.md"));
        assert_eq!(tokio::fs::read(&restored_dup).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_restore_errors() {
        let fx = fixture();
        let a = fx.watched.join("a.txt");
        tokio::fs::write(&a, b"payload").await.unwrap();
        let version = fx.engine.process(&fx.config, &a, FileAction::Create).await.unwrap();
        let out = fx.dir.path().join("restore");

        let mut unknown = version.clone();
        unknown.artifact_path = unknown.artifact_path.with_extension("bz2");
        assert!(matches!(
            fx.engine.restore(&unknown, &out).await.unwrap_err(),
            RestoreError::UnrecognizedFormat(_)
        ));

        tokio::fs::remove_file(&version.artifact_path).await.unwrap();
        assert!(matches!(
            fx.engine.restore(&version, &out).await.unwrap_err(),
            RestoreError::ArtifactMissing(_)
        ));
    }

    #[tokio::test]
    async fn test_stale_index_entry_falls_back_to_full() {
        let fx = fixture();
        let a = fx.watched.join("a.txt");
        let b = fx.watched.join("b.txt");
        tokio::fs::write(&a, b"shared").await.unwrap();
        tokio::fs::write(&b, b"shared").await.unwrap();

        let first = fx.engine.process(&fx.config, &a, FileAction::Create).await.unwrap();
        tokio::fs::remove_file(&first.artifact_path).await.unwrap();

        let second = fx.engine.process(&fx.config, &b, FileAction::Create).await.unwrap();
        assert_eq!(second.backup_type, BackupType::Full);
        assert!(second.artifact_path.is_file());
    }

    /// Rewrites the source right before storing it, like a writer racing
    /// the backup between the hash and the encode.
    struct RewriteThenStore {
        replacement: Vec<u8>,
    }

    impl IncrementalPolicy for RewriteThenStore {
        fn name(&self) -> &'static str {
            "rewrite-then-store"
        }

        fn store<'a>(
            &'a self,
            source: &'a Path,
            _previous: &'a StoredArtifact,
            dest: &'a Path,
            algo: CompressionAlgo,
            level: u32,
        ) -> futures_util::future::BoxFuture<'a, Result<WrittenArtifact, BackupError>> {
            Box::pin(async move {
                tokio::fs::write(source, &self.replacement).await?;
                codec::write_artifact(source, dest, algo, level).await
            })
        }
    }

    #[tokio::test]
    async fn test_file_changed_during_store_is_indexed_by_stored_bytes() {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("watched");
        std::fs::create_dir_all(&watched).unwrap();
        let config = MonitorPathConfig::new("docs", "Docs", &watched, dir.path().join("backup"));
        let memory = Arc::new(InMemoryStore::new());
        let replacement = b"second draft, written mid-backup\n".repeat(30);
        let engine = BackupEngine::new(EngineSettings::default(), memory.clone()).with_policy(Arc::new(
            RewriteThenStore {
                replacement: replacement.clone(),
            },
        ));

        let a = watched.join("a.txt");
        let b = watched.join("b.txt");
        let first_draft = b"first draft\n".repeat(30);
        tokio::fs::write(&a, b"initial").await.unwrap();
        engine.process(&config, &a, FileAction::Create).await.unwrap();

        tokio::fs::write(&a, &first_draft).await.unwrap();
        let modified = engine.process(&config, &a, FileAction::Modify).await.unwrap();
        assert_eq!(modified.backup_type, BackupType::Incremental);
        assert_eq!(modified.original_size, replacement.len() as u64);
        assert_eq!(modified.content_hash, hash::hash_file(&a).unwrap());

        // The first draft was never stored, so it must not dedup against the artifact
        tokio::fs::write(&b, &first_draft).await.unwrap();
        let other = engine.process(&config, &b, FileAction::Create).await.unwrap();
        assert_eq!(other.backup_type, BackupType::Full);

        let out = dir.path().join("restore");
        let restored = engine.restore(&other, &out).await.unwrap();
        assert_eq!(tokio::fs::read(&restored).await.unwrap(), first_draft);
        let restored = engine.restore(&modified, &out).await.unwrap();
        assert_eq!(tokio::fs::read(&restored).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn test_reload_index_restores_dedup_across_engines() {
        let fx = fixture();
        let a = fx.watched.join("a.txt");
        tokio::fs::write(&a, b"persisted content").await.unwrap();
        fx.engine.process(&fx.config, &a, FileAction::Create).await.unwrap();

        let fresh = BackupEngine::new(EngineSettings::default(), fx.memory.clone());
        assert_eq!(fresh.reload_index().await.unwrap(), 1);

        let again = fresh.process(&fx.config, &a, FileAction::Create).await.unwrap();
        assert_eq!(again.backup_type, BackupType::Deduplicated);
    }
}
