//! Configuration commands.

use anyhow::{Context, Result};
use culprit_config::CulpritConfig;
use std::path::Path;

/// Show the configuration after layering every source.
pub fn show(project: &Path, format: &str) -> Result<()> {
    let config = CulpritConfig::load_from_dir(project).context("failed to load configuration")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => print!("{}", config.to_toml()?),
        other => anyhow::bail!("unknown format '{other}' (expected toml or json)"),
    }
    Ok(())
}
