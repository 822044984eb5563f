//! Content hash index over stored artifacts.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{CompressionAlgo, VersionRecord};

/// An artifact that already holds some content.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub algo: CompressionAlgo,
    pub stored_size: u64,
}

#[derive(Debug, Default)]
pub struct DeduplicationIndex {
    entries: DashMap<String, StoredArtifact>,
}

impl DeduplicationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifact holding `hash`, if it is still on disk. Stale entries are
    /// evicted so the next backup of that content writes a fresh copy.
    pub fn lookup(&self, hash: &str) -> Option<StoredArtifact> {
        let found = self.entries.get(hash).map(|e| e.value().clone())?;
        if found.path.is_file() {
            return Some(found);
        }
        debug!(hash = %hash, path = %found.path.display(), "evicting stale dedup entry");
        self.entries.remove(hash);
        None
    }

    pub fn register(&self, hash: &str, artifact: StoredArtifact) {
        self.entries.insert(hash.to_string(), artifact);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild from persisted versions. Only live, non-deduplicated versions
    /// whose artifact still exists are indexed. Returns the number indexed.
    pub fn reload<'a, I>(&self, versions: I) -> usize
    where
        I: IntoIterator<Item = &'a VersionRecord>,
    {
        let mut loaded = 0;
        for v in versions {
            if v.is_deleted || v.is_deduplicated || v.content_hash.is_empty() {
                continue;
            }
            if !Path::new(&v.artifact_path).is_file() {
                continue;
            }
            self.register(
                &v.content_hash,
                StoredArtifact {
                    path: v.artifact_path.clone(),
                    algo: v.compression_algo,
                    stored_size: v.stored_size,
                },
            );
            loaded += 1;
        }
        info!("Dedup index loaded with {} artifact(s)", loaded);
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn artifact(path: PathBuf) -> StoredArtifact {
        StoredArtifact {
            path,
            algo: CompressionAlgo::Zstd,
            stored_size: 3,
        }
    }

    #[test]
    fn test_lookup_requires_live_artifact() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let live = dir.path().join("a.txt.zst");
        fs::write(&live, b"abc")?;

        let index = DeduplicationIndex::new();
        index.register("h1", artifact(live.clone()));
        index.register("h2", artifact(dir.path().join("gone.zst")));

        assert_eq!(index.lookup("h1").map(|a| a.path), Some(live));
        assert!(index.lookup("h2").is_none());
        assert_eq!(index.len(), 1);
        assert!(index.lookup("h3").is_none());
        Ok(())
    }
}
