//! Error types returned by the request handlers.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Errors that can occur while serving a read request.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// The requested file lies outside of the files directory.
    #[error("Access outside of the files directory is denied: {0}")]
    AccessDenied(String),

    /// The resolved path does not exist.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The workbook has no sheet with the requested name.
    #[error("Sheet '{sheet}' not found in file '{}'", file.display())]
    SheetNotFound { sheet: String, file: PathBuf },

    /// The file content is malformed or in an unsupported format.
    #[error("Failed to parse '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A request argument is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error while reading metadata or storing an upload.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected failure inside the server.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReaderError {
    /// Stable machine-readable name used in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ReaderError::AccessDenied(_) => "access_denied",
            ReaderError::FileNotFound(_) => "file_not_found",
            ReaderError::SheetNotFound { .. } => "sheet_not_found",
            ReaderError::Parse { .. } => "parse_error",
            ReaderError::InvalidArgument(_) => "invalid_argument",
            ReaderError::Io(_) | ReaderError::Internal(_) => "internal_error",
        }
    }
}

impl From<tokio::task::JoinError> for ReaderError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReaderError::Internal(format!("worker task failed: {}", err))
    }
}
