use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default)]
    pub last_monitor: Option<usize>,
    #[serde(default = "default_true")]
    pub cursor_capture: bool,
    #[serde(default = "default_true")]
    pub border_required: bool,
    /// Consecutive per-frame failures tolerated before the relay faults.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_log_retention")]
    pub log_retention_count: usize,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_true() -> bool {
    true
}

fn default_max_consecutive_failures() -> u32 {
    120
}

fn default_log_retention() -> usize {
    10
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            last_monitor: None,
            cursor_capture: true,
            border_required: true,
            max_consecutive_failures: default_max_consecutive_failures(),
            log_retention_count: default_log_retention(),
            log_filter: default_log_filter(),
        }
    }
}

pub struct Config {
    config_path: PathBuf,
    pub app_data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Config {
    /// Config rooted at `%APPDATA%\CapturePreview`.
    pub fn new() -> Result<Self> {
        let app_data = std::env::var("APPDATA")
            .context("Failed to get APPDATA environment variable")?;

        Self::in_dir(PathBuf::from(app_data).join("CapturePreview"))
    }

    pub fn in_dir(app_data_dir: impl Into<PathBuf>) -> Result<Self> {
        let app_data_dir = app_data_dir.into();
        let config_path = app_data_dir.join("config.json");
        let logs_dir = app_data_dir.join("logs");

        fs::create_dir_all(&app_data_dir)
            .context("Failed to create app data directory")?;
        fs::create_dir_all(&logs_dir)
            .context("Failed to create logs directory")?;

        Ok(Self {
            config_path,
            app_data_dir,
            logs_dir,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> Result<PreviewConfig> {
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "no config file, using defaults");
            return Ok(PreviewConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .context("Failed to read config file")?;

        let config: PreviewConfig = serde_json::from_str(&content)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    pub fn save(&self, config: &PreviewConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(config)
            .context("Failed to serialize config")?;

        fs::write(&self.config_path, content)
            .context("Failed to write config file")?;

        tracing::debug!(path = %self.config_path.display(), "configuration saved");
        Ok(())
    }
}
