//! Upload ingestion: uploaded files are written under the files directory
//! with a fresh name and handed to a background consumer that loads them
//! through the workbook cache, the same way a read request would.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::cache_system::WorkbookCache;
use crate::document_parser::ParserAdapter;
use crate::error::{ReaderError, Result};
use crate::path_resolver::{CanonicalPath, PathResolver};

/// Extensions accepted for uploads
pub const SUPPORTED_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Where an upload ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUpload {
    /// Name relative to the files directory, usable with every read tool
    pub filename: String,
    pub size: usize,
}

/// Producer side of the ingestion queue
#[derive(Debug, Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<CanonicalPath>,
}

impl IngestQueue {
    /// Write `content` under the resolver's root and enqueue it for loading.
    ///
    /// Only the extension of `original_name` is kept; the stored name is a
    /// random UUID so uploads never replace an existing file.
    pub async fn store_upload(
        &self,
        resolver: &PathResolver,
        original_name: &str,
        content: &[u8],
    ) -> Result<StoredUpload> {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| {
                ReaderError::InvalidArgument(format!(
                    "Unsupported file type for upload: {} (expected one of {})",
                    original_name,
                    SUPPORTED_EXTENSIONS.join(", ")
                ))
            })?;
        if content.is_empty() {
            return Err(ReaderError::InvalidArgument("uploaded file is empty".to_string()));
        }

        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let path = resolver.resolve(&filename)?;

        tokio::fs::create_dir_all(resolver.root()).await?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_path())
            .await?;
        write_or_remove(&path, file, content).await?;

        log::info!("Stored upload '{}' as {}", original_name, path);
        self.sender
            .send(path)
            .await
            .map_err(|_| ReaderError::Internal("ingestion queue is closed".to_string()))?;

        Ok(StoredUpload {
            filename,
            size: content.len(),
        })
    }
}

/// Write `content` through `writer`, deleting the file at `path` if the write
/// does not complete. A truncated upload would otherwise stay readable.
async fn write_or_remove<W>(path: &CanonicalPath, mut writer: W, content: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(content).await?;
        writer.flush().await
    }
    .await;
    drop(writer);

    if let Err(e) = written {
        log::error!("Failed to write upload {}: {}", path, e);
        if let Err(remove_err) = tokio::fs::remove_file(path.as_path()).await {
            log::warn!("Failed to remove partial upload {}: {}", path, remove_err);
        }
        return Err(e.into());
    }
    Ok(())
}

/// Start the background consumer. It runs until every [`IngestQueue`] clone
/// has been dropped.
pub fn spawn_ingest_worker<P: ParserAdapter>(
    cache: Arc<WorkbookCache<P>>,
    buffer: usize,
) -> (IngestQueue, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));

    let worker = tokio::spawn(async move {
        let mut uploads = ReceiverStream::new(receiver);
        while let Some(path) = uploads.next().await {
            // A new file under a reused name must not be served from an old parse.
            cache.invalidate(&path);

            let cache = Arc::clone(&cache);
            let display = path.to_string();
            let outcome =
                tokio::task::spawn_blocking(move || cache.get_or_load(&path).map(|_| ())).await;
            match outcome {
                Ok(Ok(())) => log::info!("Ingested upload: {}", display),
                Ok(Err(e)) => log::error!("Failed to ingest upload '{}': {}", display, e),
                Err(e) => log::error!("Ingestion task for '{}' failed: {}", display, e),
            }
        }
        log::debug!("Ingestion queue closed");
    });

    (IngestQueue { sender }, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_system::CacheConfig;
    use crate::document_parser::CalamineParser;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    fn xlsx_bytes() -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(0, 0, "uploaded").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    async fn wait_until_cached(cache: &WorkbookCache<CalamineParser>, path: &CanonicalPath) -> bool {
        for _ in 0..100 {
            if cache.is_cached(path) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_upload_is_stored_and_warmed() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path().join("incoming")).unwrap();
        let cache = Arc::new(WorkbookCache::new(CalamineParser, CacheConfig::default()));
        let (queue, _worker) = spawn_ingest_worker(Arc::clone(&cache), 8);

        let bytes = xlsx_bytes();
        let stored = queue.store_upload(&resolver, "Quarterly Report.XLSX", &bytes).await.unwrap();

        assert!(stored.filename.ends_with(".xlsx"));
        assert_eq!(stored.size, bytes.len());
        let path = resolver.resolve(&stored.filename).unwrap();
        assert_eq!(std::fs::read(path.as_path()).unwrap(), bytes);
        assert!(wait_until_cached(&cache, &path).await);
        assert_eq!(cache.stats().loads, 1);
    }

    #[tokio::test]
    async fn test_upload_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path()).unwrap();
        let cache = Arc::new(WorkbookCache::new(CalamineParser, CacheConfig::default()));
        let (queue, _worker) = spawn_ingest_worker(cache, 8);

        let first = queue.store_upload(&resolver, "a.xlsx", b"one").await.unwrap();
        let second = queue.store_upload(&resolver, "a.xlsx", b"two").await.unwrap();
        assert_ne!(first.filename, second.filename);
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_or_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path()).unwrap();
        let cache = Arc::new(WorkbookCache::new(CalamineParser, CacheConfig::default()));
        let (queue, _worker) = spawn_ingest_worker(cache, 8);

        for name in ["notes.txt", "no_extension", "../escape.sh"] {
            let err = queue.store_upload(&resolver, name, b"data").await.unwrap_err();
            assert_eq!(err.kind(), "invalid_argument", "{}", name);
        }
        let err = queue.store_upload(&resolver, "empty.xlsx", b"").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Accepts nothing, as a full disk would
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = CanonicalPath::new_unchecked(dir.path().join("partial.xlsx"));
        std::fs::write(path.as_path(), b"PK").unwrap();

        let err = write_or_remove(&path, FullDisk, &xlsx_bytes()).await.unwrap_err();

        assert_eq!(err.kind(), "internal_error");
        assert!(!path.as_path().exists());
    }

    #[tokio::test]
    async fn test_completed_write_keeps_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = CanonicalPath::new_unchecked(dir.path().join("complete.xlsx"));
        let file = tokio::fs::File::create(path.as_path()).await.unwrap();

        write_or_remove(&path, file, b"workbook").await.unwrap();

        assert_eq!(std::fs::read(path.as_path()).unwrap(), b"workbook");
    }
}
