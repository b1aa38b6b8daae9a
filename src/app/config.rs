use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const CONFIG_PATH_ENV: &str = "HARO_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HdcSettings {
    pub command_path: String,
    pub kill_on_exit: bool,
    pub command_timeout_secs: u64,
}

impl Default for HdcSettings {
    fn default() -> Self {
        Self {
            command_path: String::new(),
            kill_on_exit: true,
            command_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiSettings {
    pub language: String,
    pub theme: String,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            language: "system".to_string(),
            theme: "system".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellSettings {
    /// Recreate a session when the last one is closed while a device stays selected.
    pub keep_one_session: bool,
    pub focus_delay_ms: u64,
    pub label: String,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            keep_one_session: true,
            focus_delay_ms: 100,
            label: "Shell".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingSettings {
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            debounce_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub hdc: HdcSettings,
    #[serde(default)]
    pub ui: UiSettings,
    #[serde(default)]
    pub shell: ShellSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("haro")
        .join("settings.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "settings".to_string());
    path.with_file_name(format!("{stem}.backup.json"))
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path()).map_err(|err| err.with_trace_id(trace_id))
}

pub fn save_config(config: &AppConfig, trace_id: &str) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path))
        .map_err(|err| err.with_trace_id(trace_id))
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(&validate_config(config.clone()))
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

pub fn validate_config(mut config: AppConfig) -> AppConfig {
    config.hdc.command_path = config.hdc.command_path.trim().to_string();
    if config.hdc.command_timeout_secs == 0 {
        config.hdc.command_timeout_secs = 10;
    }
    if config.shell.focus_delay_ms > 5_000 {
        config.shell.focus_delay_ms = 100;
    }
    if config.shell.label.trim().is_empty() {
        config.shell.label = "Shell".to_string();
    }
    if config.tracking.poll_interval_ms < 100 {
        config.tracking.poll_interval_ms = 1_000;
    }
    if config.tracking.debounce_ms > 60_000 {
        config.tracking.debounce_ms = 2_000;
    }
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = "info".to_string();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("tmp");
        let config = load_config_from_path(&tmp.path().join("absent.json")).expect("load");
        assert_eq!(config, AppConfig::default());
        assert!(config.hdc.kill_on_exit);
        assert!(config.shell.keep_one_session);
        assert_eq!(config.tracking.debounce_ms, 2_000);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("settings.json");
        fs::write(&path, r#"{"hdc":{"command_path":" /opt/hdc ","kill_on_exit":false,"command_timeout_secs":5}}"#)
            .expect("write");
        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.hdc.command_path, "/opt/hdc");
        assert!(!config.hdc.kill_on_exit);
        assert_eq!(config.hdc.command_timeout_secs, 5);
        assert_eq!(config.shell, ShellSettings::default());
        assert_eq!(config.ui.theme, "system");
    }

    #[test]
    fn invalid_json_is_a_system_error() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("settings.json");
        fs::write(&path, "{ not json").expect("write");
        let err = load_config_from_path(&path).expect_err("should fail");
        assert_eq!(err.code, "ERR_SYSTEM");
    }

    #[test]
    fn save_keeps_backup_of_previous_file() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("nested").join("settings.json");
        let backup = backup_config_path(&path);

        let mut config = AppConfig::default();
        save_config_to_path(&config, &path, &backup).expect("first save");
        assert!(!backup.exists());

        config.ui.language = "zh-CN".to_string();
        save_config_to_path(&config, &path, &backup).expect("second save");
        assert!(backup.exists());

        let reloaded = load_config_from_path(&path).expect("reload");
        assert_eq!(reloaded.ui.language, "zh-CN");
        let previous = load_config_from_path(&backup).expect("backup");
        assert_eq!(previous.ui.language, "system");
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.hdc.command_timeout_secs = 0;
        config.shell.label = "  ".to_string();
        config.tracking.poll_interval_ms = 1;
        config.logging.log_level = String::new();
        let validated = validate_config(config);
        assert_eq!(validated.hdc.command_timeout_secs, 10);
        assert_eq!(validated.shell.label, "Shell");
        assert_eq!(validated.tracking.poll_interval_ms, 1_000);
        assert_eq!(validated.logging.log_level, "info");
    }

    #[test]
    fn backup_path_sits_next_to_config() {
        let backup = backup_config_path(Path::new("/tmp/haro/settings.json"));
        assert_eq!(backup, PathBuf::from("/tmp/haro/settings.backup.json"));
    }
}
