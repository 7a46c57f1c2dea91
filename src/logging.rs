// File: ./src/logging.rs
//! Logger setup: terminal output plus an appending log file under the data dir.
use crate::context::AppContext;
use anyhow::Result;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::OpenOptions;

pub fn init(ctx: &dyn AppContext, level: LevelFilter) -> Result<()> {
    let path = ctx.get_log_path()?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        // The HTTP stack is chatty at debug level.
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("rustls")
        .build();

    CombinedLogger::init(vec![
        TermLogger::new(
            level,
            config.clone(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ),
        WriteLogger::new(level, config, file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    log::debug!("Logging to {}", path.display());
    Ok(())
}
