use crate::core::error::DownloadError;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// File handle shared by concurrent writers. Seek and write happen under one lock,
/// so writers never interleave inside a `write_at` call.
pub struct SharedFileWriter {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl SharedFileWriter {
    /// Create (or truncate) `path` and pre-size it to `len` bytes when known.
    pub async fn create(path: &Path, len: Option<u64>) -> Result<Self, DownloadError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::fs_path("create dir", parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| DownloadError::fs_path("open", path, e))?;

        if let Some(sz) = len {
            // sparse on filesystems that support it
            file.set_len(sz)
                .await
                .map_err(|e| DownloadError::fs_path("set_len", path, e))?;
        }

        Ok(Self { path: path.to_path_buf(), file: tokio::sync::Mutex::new(file) })
    }

    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), DownloadError> {
        let mut f = self.file.lock().await;
        f.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| DownloadError::fs(format!("seek {} to {}", self.path.display(), offset), e))?;
        f.write_all(data)
            .await
            .map_err(|e| DownloadError::fs(format!("write {} at {}", self.path.display(), offset), e))?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), DownloadError> {
        let mut f = self.file.lock().await;
        f.flush().await.map_err(|e| DownloadError::fs_path("flush", &self.path, e))?;
        Ok(())
    }
}
