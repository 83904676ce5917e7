//! Config command handler.

use std::path::Path;

use anyhow::{Context, Result};

use robobus::config::Config;

/// Print the effective configuration (file, then env overrides).
pub(crate) fn cmd_config(config: &Config, path: Option<&Path>) -> Result<()> {
    let source = path.map(Path::to_path_buf).unwrap_or_else(Config::path);
    if source.exists() {
        println!("Config file: {}", source.display());
    } else {
        println!("Config file: {} (not found, using defaults)", source.display());
    }
    println!();

    let rendered =
        serde_json::to_string_pretty(config).with_context(|| "Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}
