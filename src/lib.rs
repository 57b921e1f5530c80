/// Excel Reader MCP - A read-only Model Context Protocol server for spreadsheets
/// Supports xlsx, xlsm, xlsb, xls and ods files, with parsed workbooks cached per path

pub mod cache_system;
pub mod config;
pub mod document_parser;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod logging;
pub mod mcp_handler;
pub mod path_resolver;

/// Re-export the ExcelReader for direct usage
pub use mcp_handler::{ExcelReader, build_reader, start_server};

/// Re-export request handling
pub use handlers::{ExcelService, FileMetadata};
pub use error::{ReaderError, Result};
pub use path_resolver::{CanonicalPath, PathResolver};

/// Re-export parsing
pub use document_parser::{CalamineParser, CellValue, DocumentHandle, ParserAdapter, Workbook};

/// Re-export caching system
pub use cache_system::{CacheConfig, CacheStats, WorkbookCache};

/// Re-export ingestion
pub use ingest::{IngestQueue, StoredUpload, spawn_ingest_worker};
