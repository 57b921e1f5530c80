use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;

/// Install the global logger.
///
/// Lines go to stderr because stdout carries the stdio transport, and are
/// appended to `log_file` when one is given.
pub fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // rmcp logs every message at debug level
        .level_for("rmcp", level.min(LevelFilter::Info))
        .chain(std::io::stderr());

    if let Some(path) = log_file {
        let file = fern::log_file(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        dispatch = dispatch.chain(file);
    }

    dispatch.apply().context("Logger already initialised")?;
    Ok(())
}
