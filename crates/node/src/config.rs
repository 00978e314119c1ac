use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use coop::CoopConfig;

/// Reads the TOML config, or falls back to defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<CoopConfig> {
    let Some(path) = path else {
        return Ok(CoopConfig::default());
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = CoopConfig::from_toml_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    log::info!("loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_gives_defaults() {
        assert_eq!(load(None).unwrap(), CoopConfig::default());
    }

    #[test]
    fn test_unreadable_file_names_path() {
        let err = load(Some(Path::new("/nonexistent/coop.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/coop.toml"));
    }
}
