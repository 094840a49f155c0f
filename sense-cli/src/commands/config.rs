//! Print the configuration.

use anyhow::{Context, Result};
use sense_node::Config;

/// Render `settings` as TOML.
pub fn render(settings: &Config) -> Result<String> {
    settings
        .to_toml_string()
        .context("Failed to render configuration")
}

/// Run the config command.
pub fn run(settings: &Config) -> Result<()> {
    print!("{}", render(settings)?);
    Ok(())
}
