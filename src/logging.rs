use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub enum LogOutput<'a> {
    Stderr,
    File(&'a Path),
    /// Terminal UI without a log file
    Off,
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(output: LogOutput<'_>) -> Result<()> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camfeed=info"));

    let result = match output {
        LogOutput::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .try_init(),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        LogOutput::Off => return Ok(()),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}
