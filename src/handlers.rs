//! Request handlers: resolve the file name, fetch the workbook from the cache
//! and project the query onto it.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache_system::{CacheStats, WorkbookCache};
use crate::document_parser::{CalamineParser, CellValue, DocumentHandle, ParserAdapter};
use crate::error::{ReaderError, Result};
use crate::ingest::{IngestQueue, StoredUpload};
use crate::path_resolver::{CanonicalPath, PathResolver};

/// File metadata, always read fresh from disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMetadata {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified_at: f64,
    pub modified_at_iso: String,
    pub is_readonly: bool,
}

/// Read-only spreadsheet operations over a sandboxed directory
pub struct ExcelService<P: ParserAdapter = CalamineParser> {
    resolver: PathResolver,
    cache: Arc<WorkbookCache<P>>,
    ingest: Option<IngestQueue>,
}

impl<P: ParserAdapter> Clone for ExcelService<P> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            cache: Arc::clone(&self.cache),
            ingest: self.ingest.clone(),
        }
    }
}

impl<P: ParserAdapter> ExcelService<P> {
    pub fn new(resolver: PathResolver, cache: Arc<WorkbookCache<P>>) -> Self {
        Self {
            resolver,
            cache,
            ingest: None,
        }
    }

    /// Accept uploads through `queue`
    pub fn with_ingest(mut self, queue: IngestQueue) -> Self {
        self.ingest = Some(queue);
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<WorkbookCache<P>> {
        &self.cache
    }

    /// Sheet names of `filename` in workbook order
    pub async fn list_sheet_names(&self, filename: &str) -> Result<Vec<String>> {
        self.with_document(filename, |document| Ok(document.sheet_names()))
            .await
    }

    /// Value of the cell at one-based (`row`, `col`); `None` for an empty cell
    pub async fn get_cell(
        &self,
        filename: &str,
        sheet_name: &str,
        row: u32,
        col: u32,
    ) -> Result<Option<CellValue>> {
        if row == 0 || col == 0 {
            return Err(ReaderError::InvalidArgument(format!(
                "row and col start at 1, got row {} col {}",
                row, col
            )));
        }
        let sheet_name = sheet_name.to_string();
        self.with_document(filename, move |document| {
            document.cell(&sheet_name, row - 1, col - 1)
        })
        .await
    }

    /// All rows of a sheet. Fully empty rows are left out unless `include_empty_rows`.
    pub async fn get_all_rows(
        &self,
        filename: &str,
        sheet_name: &str,
        include_empty_rows: bool,
    ) -> Result<Vec<Vec<CellValue>>> {
        let sheet_name = sheet_name.to_string();
        self.with_document(filename, move |document| {
            document.rows(&sheet_name, !include_empty_rows)
        })
        .await
    }

    /// Size and modification time of `filename`. Never served from the cache.
    pub async fn get_file_metadata(&self, filename: &str) -> Result<FileMetadata> {
        let path = self.resolver.resolve(filename)?;
        let metadata = match tokio::fs::metadata(path.as_path()).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReaderError::FileNotFound(path.into_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified()?;
        let modified_at = modified
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default();

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at,
            modified_at_iso: DateTime::<Utc>::from(modified).to_rfc3339(),
            is_readonly: true,
        })
    }

    /// Store an uploaded file under the files directory and queue it for loading
    pub async fn upload_file(&self, filename: &str, content: &[u8]) -> Result<StoredUpload> {
        let queue = self
            .ingest
            .as_ref()
            .ok_or_else(|| ReaderError::AccessDenied("uploads are disabled".to_string()))?;
        queue.store_upload(&self.resolver, filename, content).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Invalidate one file, or the whole cache when `filename` is `None`.
    /// Returns the number of entries dropped.
    pub fn clear_cache(&self, filename: Option<&str>) -> Result<usize> {
        match filename {
            Some(filename) => {
                let path = self.resolver.resolve(filename)?;
                Ok(usize::from(self.cache.invalidate(&path)))
            }
            None => {
                let entries = self.cache.stats().entries;
                self.cache.clear();
                Ok(entries)
            }
        }
    }

    /// Resolve `filename`, load it through the cache and run `query` on it.
    ///
    /// Runs on the blocking pool. If the caller goes away mid-parse the task
    /// still finishes and the workbook stays cached.
    async fn with_document<T, F>(&self, filename: &str, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&P::Document) -> Result<T> + Send + 'static,
    {
        let path: CanonicalPath = self.resolver.resolve(filename)?;
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || {
            let document = cache.get_or_load(&path)?;
            query(&*document)
        })
        .await?
    }
}
