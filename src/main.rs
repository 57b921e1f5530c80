use anyhow::Result;
use clap::Parser;
use tokio::runtime::Runtime;

use excel_reader_mcp::config::Cli;
use excel_reader_mcp::logging::init_logging;
use excel_reader_mcp::start_server;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.settings.log_level, cli.settings.log_file.as_deref())?;

    // Create a Tokio runtime for async operations
    let rt = Runtime::new()?;

    // Run the RMCP server in the Tokio runtime
    rt.block_on(async {
        start_server(&cli.settings, cli.transport()).await
    })?;

    Ok(())
}
