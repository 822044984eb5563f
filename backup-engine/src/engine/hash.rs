//! Content hashing for deduplication.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use blake3::Hasher;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

use crate::utils::errors::BackupError;

const READ_BUF: usize = 64 * 1024;

/// Stream a file through blake3 and return the hex digest.
pub fn hash_file(path: &Path) -> Result<String, BackupError> {
    let mut file = File::open(path).map_err(|e| BackupError::InvalidSource {
        path: path.to_path_buf(),
        reason: format!("cannot open for hashing: {e}"),
    })?;

    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let hash = hasher.finalize().to_hex().to_string();
    debug!(path = %path.display(), hash = %hash, "hashed file");
    Ok(hash)
}

/// [`hash_file`] on the blocking pool.
pub async fn hash_file_async(path: PathBuf) -> Result<String, BackupError> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| BackupError::Hash(format!("hash task failed: {e}")))?
}

/// Hashes and counts every byte read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
    bytes: u64,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            bytes: 0,
        }
    }

    /// Hex digest and length of everything read so far.
    pub fn finish(&self) -> (String, u64) {
        (self.hasher.finalize().to_hex().to_string(), self.bytes)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let fresh = &buf.filled()[before..];
            this.hasher.update(fresh);
            this.bytes += fresh.len() as u64;
        }
        poll
    }
}
