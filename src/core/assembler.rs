use crate::core::error::DownloadError;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Concatenate `parts` into `dest` in slice order, deleting each part once copied.
///
/// On failure `dest` is left as written so far; the caller decides whether to keep it.
pub async fn merge_chunk_files(parts: &[PathBuf], dest: &Path) -> Result<u64, DownloadError> {
    let out = File::create(dest)
        .await
        .map_err(|e| DownloadError::fs_path("create", dest, e))?;
    let mut out = BufWriter::with_capacity(512 * 1024, out);

    let mut total = 0u64;
    for (index, part) in parts.iter().enumerate() {
        let mut src = File::open(part)
            .await
            .map_err(|source| DownloadError::MergeFailed { index, source })?;
        let copied = tokio::io::copy(&mut src, &mut out)
            .await
            .map_err(|source| DownloadError::MergeFailed { index, source })?;
        drop(src);
        total += copied;

        tokio::fs::remove_file(part)
            .await
            .map_err(|e| DownloadError::fs_path("remove", part, e))?;
        tracing::trace!(index, copied, part = %part.display(), "merged chunk");
    }

    out.flush()
        .await
        .map_err(|source| DownloadError::MergeFailed { index: parts.len().saturating_sub(1), source })?;

    Ok(total)
}

/// `chunk_<index>.tmp` inside `dir`.
pub fn chunk_file_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("chunk_{}.tmp", index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merges_in_index_order_and_removes_parts() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<PathBuf> = (0..3).map(|i| chunk_file_path(dir.path(), i)).collect();

        // written out of order on purpose
        tokio::fs::write(&parts[2], b"ghi").await.unwrap();
        tokio::fs::write(&parts[0], b"abc").await.unwrap();
        tokio::fs::write(&parts[1], b"def").await.unwrap();

        let dest = dir.path().join("out.txt");
        let n = merge_chunk_files(&parts, &dest).await.unwrap();

        assert_eq!(n, 9);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"abcdefghi");
        for p in &parts {
            assert!(!p.exists(), "{} should be removed", p.display());
        }
    }

    #[tokio::test]
    async fn missing_part_reports_its_index() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<PathBuf> = (0..3).map(|i| chunk_file_path(dir.path(), i)).collect();
        tokio::fs::write(&parts[0], b"abc").await.unwrap();
        tokio::fs::write(&parts[2], b"ghi").await.unwrap();

        let dest = dir.path().join("out.txt");
        let err = merge_chunk_files(&parts, &dest).await.unwrap_err();
        assert!(matches!(err, DownloadError::MergeFailed { index: 1, .. }));
    }

    #[test]
    fn chunk_file_naming() {
        let p = chunk_file_path(Path::new("/tmp/x"), 7);
        assert_eq!(p, PathBuf::from("/tmp/x/chunk_7.tmp"));
    }
}
