//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::output::{print_info, print_success, print_warning};
use vg_core::config::{self, OrchestratorConfig};

/// Path of the config file in use
pub fn config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the config the daemon would use, falling back to defaults when the file is absent
pub fn load_effective_config(config_path: Option<&PathBuf>) -> Result<OrchestratorConfig> {
    let path = self::config_path(config_path);
    if !path.exists() {
        if config_path.is_some() {
            anyhow::bail!("Config file not found: {:?}", path);
        }
        return Ok(OrchestratorConfig::default());
    }
    config::load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))
}

/// Show the effective configuration as TOML
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = self::config_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file found at {:?}, showing defaults", path));
    }
    println!();

    let config = load_effective_config(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = self::config_path(config_path);
    if path.exists() && !force {
        print_warning(&format!("Config file already exists at {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &OrchestratorConfig::default())
        .with_context(|| format!("Failed to write config to {:?}", path))?;
    print_success(&format!("Created config file: {:?}", path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_effective_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "http_bind = \"0.0.0.0:9000\"\n").unwrap();

        let config = load_effective_config(Some(&path)).unwrap();
        assert_eq!(config.http_bind, "0.0.0.0:9000");
        assert_eq!(config.tunnel_bind, "127.0.0.1:8751");
    }

    #[test]
    fn test_init_keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(&path), false).unwrap();
        let written = load_effective_config(Some(&path)).unwrap();
        assert_eq!(written.console_token_ttl.as_secs(), 120);

        std::fs::write(&path, "http_bind = \"10.0.0.1:8750\"\n").unwrap();
        config_init(Some(&path), false).unwrap();
        assert_eq!(load_effective_config(Some(&path)).unwrap().http_bind, "10.0.0.1:8750");

        config_init(Some(&path), true).unwrap();
        assert_eq!(load_effective_config(Some(&path)).unwrap().http_bind, "127.0.0.1:8750");
    }
}
