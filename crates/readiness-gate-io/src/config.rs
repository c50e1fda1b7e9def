use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use readiness_gate_core::{GateConfig, GateError, GateRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(anyhow!(
                "unsupported gate config format for {}; expected .json, .yaml or .yml",
                path.display()
            )),
        }
    }
}

/// Read a gate configuration document. The format follows the file extension.
///
/// A document that does not match the configuration shape (including one
/// without a `rule`) is reported as [`GateError::InvalidConfig`].
///
/// # Errors
/// Returns an error when the file cannot be read or parsed.
pub fn load_gate_config(path: &Path) -> Result<GateConfig> {
    let format = ConfigFormat::from_path(path)?;
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read gate config {}", path.display()))?;

    let parsed = match format {
        ConfigFormat::Json => {
            serde_json::from_str::<GateConfig>(&text).map_err(|err| err.to_string())
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str::<GateConfig>(&text).map_err(|err| err.to_string())
        }
    };
    let config = parsed
        .map_err(|message| GateError::InvalidConfig(format!("{}: {message}", path.display())))?;

    tracing::info!(path = %path.display(), rule = %config.rule, "loaded gate config");
    Ok(config)
}

/// Read and interpret a gate configuration document.
///
/// # Errors
/// Returns an error when the document cannot be loaded, names an unknown rule,
/// or carries invalid parameters.
pub fn load_gate_rule(path: &Path) -> Result<GateRule> {
    let config = load_gate_config(path)?;
    GateRule::from_config(&config)
        .with_context(|| format!("invalid gate config {}", path.display()))
}
