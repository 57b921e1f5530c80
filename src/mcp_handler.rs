use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::tool::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::transport::sse_server::SseServer;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt, schemars, tool, tool_handler, tool_router};
use serde::{Deserialize, Serialize};

use crate::cache_system::WorkbookCache;
use crate::config::{Settings, Transport};
use crate::document_parser::CalamineParser;
use crate::error::ReaderError;
use crate::handlers::ExcelService;
use crate::ingest::spawn_ingest_worker;
use crate::path_resolver::PathResolver;

/// Queued uploads waiting for the ingestion worker
const INGEST_QUEUE_SIZE: usize = 64;

/// Spreadsheet reader exposed as MCP tools
#[derive(Clone)]
pub struct ExcelReader {
    service: ExcelService,
    tool_router: ToolRouter<ExcelReader>,
}

/// Input naming a file relative to the files directory
#[derive(Serialize, Deserialize, Debug, schemars::JsonSchema)]
pub struct FileInput {
    #[schemars(description = "File name relative to the files directory")]
    pub filename: String,
}

/// Input for the get_cell tool
#[derive(Serialize, Deserialize, Debug, schemars::JsonSchema)]
pub struct CellInput {
    #[schemars(description = "File name relative to the files directory")]
    pub filename: String,
    #[schemars(description = "Sheet name (exact, case-sensitive)")]
    pub sheet_name: String,
    #[schemars(description = "Row number, starting at 1")]
    pub row: i64,
    #[schemars(description = "Column number, starting at 1")]
    pub col: i64,
}

/// Input for the get_all_rows tool
#[derive(Serialize, Deserialize, Debug, schemars::JsonSchema)]
pub struct RowsInput {
    #[schemars(description = "File name relative to the files directory")]
    pub filename: String,
    #[schemars(description = "Sheet name (exact, case-sensitive)")]
    pub sheet_name: String,
    #[schemars(description = "Keep rows where every cell is empty (default: false)")]
    pub include_empty_rows: Option<bool>,
}

/// Input for the upload_file tool
#[derive(Serialize, Deserialize, Debug, schemars::JsonSchema)]
pub struct UploadInput {
    #[schemars(description = "Original file name; only its extension is kept")]
    pub filename: String,
    #[schemars(description = "File content encoded as standard base64")]
    pub content_base64: String,
}

/// Input for the clear_cache tool
#[derive(Serialize, Deserialize, Debug, schemars::JsonSchema)]
pub struct ClearCacheInput {
    #[schemars(description = "File to drop from the cache; the whole cache when omitted")]
    pub filename: Option<String>,
}

/// Uniform response body. Failures are reported inside a successful tool
/// call so every client sees the same shape.
#[derive(Serialize, Debug)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope<T> {
    Ok { data: T },
    Error { error: ErrorBody },
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl<T: Serialize> Envelope<T> {
    fn from_result(result: Result<T, ReaderError>) -> Self {
        match result {
            Ok(data) => Envelope::Ok { data },
            Err(e) => Envelope::Error {
                error: ErrorBody {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            },
        }
    }
}

/// Log the outcome of `tool` for `filename` and wrap it into a tool result
fn respond<T: Serialize>(
    tool: &str,
    filename: &str,
    result: Result<T, ReaderError>,
) -> Result<CallToolResult, McpError> {
    if let Err(e) = &result {
        log::error!("Error in {} for '{}': {}", tool, filename, e);
    }
    let body = serde_json::to_string(&Envelope::from_result(result))
        .map_err(|e| McpError::internal_error(format!("Error serializing response: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(body)]))
}

fn one_based(name: &str, value: i64) -> Result<u32, ReaderError> {
    u32::try_from(value)
        .ok()
        .filter(|value| *value >= 1)
        .ok_or_else(|| ReaderError::InvalidArgument(format!("{} must be at least 1, got {}", name, value)))
}

#[tool_router]
impl ExcelReader {
    pub fn new(service: ExcelService) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    pub fn service(&self) -> &ExcelService {
        &self.service
    }

    #[tool(description = "List the sheet names of a spreadsheet file")]
    pub async fn get_sheet_names(
        &self,
        Parameters(input): Parameters<FileInput>,
    ) -> Result<CallToolResult, McpError> {
        log::info!("get_sheet_names request for file: {}", input.filename);
        let result = self.service.list_sheet_names(&input.filename).await;
        respond("get_sheet_names", &input.filename, result)
    }

    #[tool(description = "Read one cell value (row and col start at 1); null for an empty cell")]
    pub async fn get_cell(
        &self,
        Parameters(input): Parameters<CellInput>,
    ) -> Result<CallToolResult, McpError> {
        log::info!(
            "get_cell request for {} -> {} [{}, {}]",
            input.filename, input.sheet_name, input.row, input.col
        );
        let result = match (one_based("row", input.row), one_based("col", input.col)) {
            (Ok(row), Ok(col)) => {
                self.service
                    .get_cell(&input.filename, &input.sheet_name, row, col)
                    .await
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        respond("get_cell", &input.filename, result)
    }

    #[tool(description = "Read all rows of a sheet as a list of lists; empty rows are skipped by default")]
    pub async fn get_all_rows(
        &self,
        Parameters(input): Parameters<RowsInput>,
    ) -> Result<CallToolResult, McpError> {
        log::info!("get_all_rows request for {} -> {}", input.filename, input.sheet_name);
        let result = self
            .service
            .get_all_rows(
                &input.filename,
                &input.sheet_name,
                input.include_empty_rows.unwrap_or(false),
            )
            .await;
        respond("get_all_rows", &input.filename, result)
    }

    #[tool(description = "Get size and modification time of a file, read fresh from disk")]
    pub async fn get_file_metadata(
        &self,
        Parameters(input): Parameters<FileInput>,
    ) -> Result<CallToolResult, McpError> {
        log::info!("get_file_metadata request for file: {}", input.filename);
        let result = self.service.get_file_metadata(&input.filename).await;
        respond("get_file_metadata", &input.filename, result)
    }

    #[tool(description = "Upload a spreadsheet (base64) into the files directory; returns the stored file name")]
    pub async fn upload_file(
        &self,
        Parameters(input): Parameters<UploadInput>,
    ) -> Result<CallToolResult, McpError> {
        log::info!("upload_file request for file: {}", input.filename);
        let result = match BASE64.decode(input.content_base64.trim()) {
            Ok(content) => self.service.upload_file(&input.filename, &content).await,
            Err(e) => Err(ReaderError::InvalidArgument(format!("content_base64 is not valid base64: {}", e))),
        };
        respond("upload_file", &input.filename, result)
    }

    #[tool(description = "Show workbook cache statistics")]
    pub async fn get_cache_stats(&self) -> Result<CallToolResult, McpError> {
        respond("get_cache_stats", "-", Ok(self.service.cache_stats()))
    }

    #[tool(description = "Drop one file, or every file, from the workbook cache")]
    pub async fn clear_cache(
        &self,
        Parameters(input): Parameters<ClearCacheInput>,
    ) -> Result<CallToolResult, McpError> {
        let filename = input.filename.as_deref();
        log::info!("clear_cache request for {}", filename.unwrap_or("all files"));
        let result = self
            .service
            .clear_cache(filename)
            .map(|removed| serde_json::json!({ "removed": removed }));
        respond("clear_cache", filename.unwrap_or("-"), result)
    }
}

#[tool_handler]
impl ServerHandler for ExcelReader {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "This server provides read-only access to Excel and OpenDocument spreadsheets: sheet names, cell values, whole sheets and file metadata. File names are relative to the server's files directory. Every tool returns a JSON object with status \"ok\" and data, or status \"error\" and an error kind and message.".to_string()
            ),
        }
    }
}

/// Build the reader from settings. Must run inside a Tokio runtime when
/// uploads are enabled, since the ingestion worker is spawned here.
pub fn build_reader(settings: &Settings) -> Result<ExcelReader> {
    if !settings.files_path.is_dir() {
        log::warn!(
            "Files directory not found: {}. Make sure the volume is mounted correctly; creating it.",
            settings.files_path.display()
        );
        std::fs::create_dir_all(&settings.files_path).with_context(|| {
            format!("Failed to create files directory: {}", settings.files_path.display())
        })?;
    }

    let resolver = PathResolver::new(&settings.files_path)?;
    let cache = Arc::new(WorkbookCache::new(CalamineParser, settings.cache_config()));
    let mut service = ExcelService::new(resolver, Arc::clone(&cache));

    if settings.allow_uploads {
        let (queue, _worker) = spawn_ingest_worker(cache, INGEST_QUEUE_SIZE);
        service = service.with_ingest(queue);
    }

    log::info!("Files directory: {}", service.resolver().root().display());
    Ok(ExcelReader::new(service))
}

/// Set up the MCP server with our tools and serve until the client or Ctrl-C stops it
pub async fn start_server(settings: &Settings, transport: Transport) -> Result<()> {
    let excel_reader = build_reader(settings)?;

    match transport {
        Transport::Stdio => {
            use tokio::io::{stdin, stdout};
            log::info!("Starting Excel reader MCP server on stdio");

            let server = excel_reader.serve((stdin(), stdout())).await?;
            let quit_reason = server.waiting().await?;
            log::info!("Server stopped: {:?}", quit_reason);
        }
        Transport::Sse { host, port } => {
            let bind_addr = resolve_bind_addr(&host, port).await?;
            log::info!("Starting Excel reader MCP server in SSE mode on {}", bind_addr);

            let ct = SseServer::serve(bind_addr)
                .await
                .with_context(|| format!("Failed to bind {}", bind_addr))?
                .with_service(move || excel_reader.clone());

            tokio::signal::ctrl_c().await?;
            log::info!("Shutting down");
            ct.cancel();
        }
    }

    Ok(())
}

async fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve bind host: {}", host))?
        .next()
        .with_context(|| format!("No address found for bind host: {}", host))
}
