use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::cache_system::CacheConfig;

/// Read-only MCP server for Excel and OpenDocument spreadsheets
#[derive(Parser, Debug)]
#[command(name = "excel-reader-mcp", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub transport: Option<Transport>,

    #[command(flatten)]
    pub settings: Settings,
}

impl Cli {
    /// Transport to serve on, stdio when no subcommand is given
    pub fn transport(&self) -> Transport {
        self.transport.clone().unwrap_or(Transport::Stdio)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Serve over stdin/stdout
    Stdio,
    /// Serve over HTTP with Server-Sent Events
    Sse {
        #[arg(long, env = "FASTMCP_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "FASTMCP_PORT", default_value_t = 8000)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Directory the served files live in; requests cannot leave it
    #[arg(long, env = "EXCEL_FILES_PATH", default_value = "./excel_files", global = true)]
    pub files_path: PathBuf,

    /// Maximum number of parsed workbooks kept in memory (unbounded if unset)
    #[arg(long, env = "EXCEL_CACHE_CAPACITY", value_parser = clap::value_parser!(u64).range(1..), global = true)]
    pub cache_capacity: Option<u64>,

    /// Reload cached workbooks whose file changed on disk
    #[arg(long, env = "EXCEL_CACHE_REVALIDATE", global = true)]
    pub revalidate: bool,

    /// Enable the upload_file tool
    #[arg(long, env = "EXCEL_ALLOW_UPLOADS", global = true)]
    pub allow_uploads: bool,

    #[arg(long, env = "EXCEL_MCP_LOG", default_value = "info", global = true)]
    pub log_level: LevelFilter,

    /// Also append log lines to this file
    #[arg(long, env = "EXCEL_MCP_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

impl Settings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self
                .cache_capacity
                .map(|capacity| usize::try_from(capacity).unwrap_or(usize::MAX)),
            revalidate: self.revalidate,
        }
    }
}
