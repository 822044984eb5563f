//! Artifact encoding and decoding.
//!
//! Artifacts are written to a `.part` sibling first and renamed into place, so
//! a crash never leaves a truncated file under a valid artifact name.

use std::path::{Path, PathBuf};

use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder, ZstdDecoder, ZstdEncoder};
use async_compression::Level;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};

use super::hash::HashingReader;
use crate::models::CompressionAlgo;
use crate::utils::errors::{BackupError, RestoreError};

/// What [`write_artifact`] stored. `content_hash` and `original_size`
/// describe the bytes that went into the artifact, which can differ from an
/// earlier read of a file that is still being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub stored_size: u64,
    pub original_size: u64,
    pub content_hash: String,
}

/// Encode `source` into `dest`, hashing the source bytes on the way in.
pub async fn write_artifact(
    source: &Path,
    dest: &Path,
    algo: CompressionAlgo,
    level: u32,
) -> Result<WrittenArtifact, BackupError> {
    let input = File::open(source)
        .await
        .map_err(|e| BackupError::InvalidSource {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
    let mut hashing = HashingReader::new(input);
    let reader = BufReader::new(&mut hashing);
    let quality = Level::Precise(level as i32);

    let part = part_path(dest);
    let result = match algo {
        CompressionAlgo::Zstd => copy_into(ZstdEncoder::with_quality(reader, quality), &part).await,
        CompressionAlgo::Gzip => copy_into(GzipEncoder::with_quality(reader, quality), &part).await,
        CompressionAlgo::None => copy_into(reader, &part).await,
    };

    let stored = match result {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(BackupError::Compression(format!(
                "{} encoding of {} failed: {e}",
                algo,
                source.display()
            )));
        }
    };

    tokio::fs::rename(&part, dest).await?;
    let (content_hash, original_size) = hashing.finish();
    Ok(WrittenArtifact {
        stored_size: stored,
        original_size,
        content_hash,
    })
}

/// Decode the artifact at `artifact` into `dest`, overwriting it.
pub async fn read_artifact(
    artifact: &Path,
    dest: &Path,
    algo: CompressionAlgo,
) -> Result<u64, RestoreError> {
    let input = match File::open(artifact).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RestoreError::ArtifactMissing(artifact.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let reader = BufReader::new(input);

    let part = part_path(dest);
    let result = match algo {
        CompressionAlgo::Zstd => copy_into(ZstdDecoder::new(reader), &part).await,
        CompressionAlgo::Gzip => copy_into(GzipDecoder::new(reader), &part).await,
        CompressionAlgo::None => copy_into(reader, &part).await,
    };

    let written = match result {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(match e.kind() {
                std::io::ErrorKind::PermissionDenied => RestoreError::DestinationUnwritable {
                    path: dest.to_path_buf(),
                    reason: e.to_string(),
                },
                _ => RestoreError::Io(e),
            });
        }
    };

    tokio::fs::rename(&part, dest).await?;
    Ok(written)
}

async fn copy_into<R>(reader: R, dest: &Path) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut reader = reader;
    let mut out = File::create(dest).await?;
    let n = tokio::io::copy(&mut reader, &mut out).await?;
    out.flush().await?;
    out.sync_all().await?;
    Ok(n)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
