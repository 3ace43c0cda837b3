//! Settings file loader and environment overrides.

use super::{RunConfig, ENDPOINT_ENV, TOOL_ENV};
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the global settings path: ~/.config/device-stager/settings.json
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;

    Ok(home.join(".config/device-stager").join("settings.json"))
}

/// Load config from JSON file.
pub fn load_config_from_file(path: &Path) -> Result<RunConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: RunConfig = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;

    Ok(config)
}

/// Save config to JSON file.
pub fn save_config_to_file(config: &RunConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content = serde_json::to_string_pretty(config).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .json extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .json extension".to_string(),
        )),
    }
}

/// Apply `DEVICE_STAGER_ENDPOINT` / `DEVICE_STAGER_TOOL` on top of `config`.
///
/// `lookup` is `std::env::var` in production; tests pass a closure.
pub fn apply_env_overrides<F>(config: &mut RunConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
        log::debug!("[Config] endpoint overridden by {}", ENDPOINT_ENV);
        config.payload_endpoint = Some(endpoint.trim().to_string());
    }
    if let Some(tool) = lookup(TOOL_ENV).filter(|v| !v.trim().is_empty()) {
        log::debug!("[Config] tool path overridden by {}", TOOL_ENV);
        config.tool_path = PathBuf::from(tool.trim());
    }
}

/// Defaults, then the global settings file if present, then environment overrides.
///
/// A missing settings file is normal; a present but unreadable one is an error.
pub fn load_run_config() -> Result<RunConfig, ConfigError> {
    let mut config = match get_global_settings_path() {
        Ok(path) if path.exists() => {
            log::debug!("[Config] loading settings from {}", path.display());
            load_config_from_file(&path)?
        }
        Ok(_) => RunConfig::default(),
        Err(e) => {
            log::debug!("[Config] no settings location ({}), using defaults", e);
            RunConfig::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.json");

        let mut original = RunConfig::default();
        original.payload_endpoint = Some("https://payload.example.test/get".to_string());
        original.timings.trigger_appearance = Duration::from_secs(600);
        original.plan.trigger_marker = "/Books/other.epub".to_string();

        save_config_to_file(&original, &config_path).expect("Failed to save config");
        assert!(config_path.exists(), "Config file should exist after save");

        let loaded = load_config_from_file(&config_path).expect("Failed to load config");
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, r#"{"payload_endpoint": "http://127.0.0.1:9/x"}"#).unwrap();

        let loaded = load_config_from_file(&path).unwrap();
        assert_eq!(loaded.payload_endpoint.as_deref(), Some("http://127.0.0.1:9/x"));
        assert_eq!(loaded.timings, RunConfig::default().timings);
        assert_eq!(loaded.plan, RunConfig::default().plan);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_config_from_file(&temp_dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_config_from_file(&path),
            Err(ConfigError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_validate_config_path_extension() {
        assert!(validate_config_path(Path::new("settings.json")).is_ok());
        assert!(validate_config_path(Path::new("settings.toml")).is_err());
        assert!(validate_config_path(Path::new("settings")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENDPOINT_ENV, " https://payload.example.test/get "),
            (TOOL_ENV, "/opt/go-ios/ios"),
        ]
        .into_iter()
        .collect();

        let mut config = RunConfig::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.payload_endpoint.as_deref(),
            Some("https://payload.example.test/get")
        );
        assert_eq!(config.tool_path, PathBuf::from("/opt/go-ios/ios"));
    }

    #[test]
    fn test_blank_env_override_ignored() {
        let mut config = RunConfig::default();
        config.payload_endpoint = Some("https://kept.example.test/".to_string());
        apply_env_overrides(&mut config, |_| Some("   ".to_string()));
        assert_eq!(config.payload_endpoint.as_deref(), Some("https://kept.example.test/"));
        assert_eq!(config.tool_path, super::super::default_tool_path());
    }
}
