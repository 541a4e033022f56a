//! Local spool for in-progress uploads.
//!
//! Each session gets one preallocated backing file at
//! `spool_dir/{upload_id}.part`. Chunk writes land at
//! `index * chunk_size`; the file already has its final length, so
//! out-of-order writes never extend it. Blocking file I/O runs on the
//! blocking pool.

use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use stowage_core::session::UploadId;

/// Spool directory handle.
#[derive(Clone, Debug)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the spool directory if needed.
    pub async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Backing file path for a session.
    pub fn path_for(&self, upload_id: &UploadId) -> PathBuf {
        self.dir.join(format!("{upload_id}.part"))
    }

    /// Create the backing file preallocated to exactly `total_size` bytes.
    pub async fn allocate(&self, path: &Path, total_size: u64) -> std::io::Result<()> {
        let file = tokio::fs::File::create(path).await?;
        file.set_len(total_size).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write verified chunk bytes at the given offset.
    pub async fn write_at(&self, path: &Path, offset: u64, data: Bytes) -> std::io::Result<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&data)?;
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::other(format!("spool write task failed: {e}")))?
    }

    /// Read back a byte range, e.g. for replay verification or MIME
    /// sniffing. Short files yield a short read.
    pub async fn read_range(&self, path: &Path, offset: u64, len: u64) -> std::io::Result<Bytes> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; len as usize];
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(|e| std::io::Error::other(format!("spool read task failed: {e}")))?
    }

    /// Remove a backing file. A missing file is not an error: abort,
    /// expiry, and scan rejection may race over the same path.
    pub async fn remove(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
