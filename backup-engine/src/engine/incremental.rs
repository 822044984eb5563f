//! Storage strategy for versions classified as INCREMENTAL.

use std::path::Path;

use futures_util::future::BoxFuture;

use super::codec::{self, WrittenArtifact};
use super::dedup::StoredArtifact;
use crate::models::CompressionAlgo;
use crate::utils::errors::BackupError;

/// How an INCREMENTAL version is written. `previous` is the last artifact
/// stored for the same monitored path.
pub trait IncrementalPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write the new version to `dest`. The returned hash must cover the
    /// bytes the artifact restores to.
    fn store<'a>(
        &'a self,
        source: &'a Path,
        previous: &'a StoredArtifact,
        dest: &'a Path,
        algo: CompressionAlgo,
        level: u32,
    ) -> BoxFuture<'a, Result<WrittenArtifact, BackupError>>;
}

/// Store the full new content again, compressed like a FULL version.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecompressPolicy;

impl IncrementalPolicy for RecompressPolicy {
    fn name(&self) -> &'static str {
        "recompress"
    }

    fn store<'a>(
        &'a self,
        source: &'a Path,
        _previous: &'a StoredArtifact,
        dest: &'a Path,
        algo: CompressionAlgo,
        level: u32,
    ) -> BoxFuture<'a, Result<WrittenArtifact, BackupError>> {
        Box::pin(codec::write_artifact(source, dest, algo, level))
    }
}
