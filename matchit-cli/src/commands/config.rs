use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use shared::config::ClientConfig;

/// Writes a default configuration in `format` ("yaml" or "json") to
/// `output`, or to `matchit.<format>` in the current directory.
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str, output: Option<PathBuf>) -> Result<PathBuf> {
    let config = ClientConfig::with_defaults();
    let serialized = match format {
        "yaml" => serde_yml::to_string(&config)?,
        "json" => serde_json::to_string_pretty(&config)?,
        other => bail!("Unsupported format '{other}'. Use 'yaml' or 'json'."),
    };

    let path = output.unwrap_or_else(|| PathBuf::from(format!("matchit.{format}")));
    fs::write(&path, serialized)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("Configuration file '{}' generated successfully.", path.display());
    Ok(path)
}
