use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory the image blob store lives in.
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    /// Root of the remote archive; per-comic metadata is served at
    /// `{archive_url}/{number}/info.0.json`.
    #[serde(default = "default_archive_url")]
    pub archive_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on concurrently running fetches.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("comic-vault");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("comics.sqlite").to_string_lossy().to_string()
}

fn default_image_dir() -> String {
    let image_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("comic-vault")
        .join("images");
    std::fs::create_dir_all(&image_dir).ok();
    image_dir.to_string_lossy().to_string()
}

fn default_archive_url() -> String {
    crate::fetch::DEFAULT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_fetch_concurrency() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            image_dir: default_image_dir(),
            archive_url: default_archive_url(),
            request_timeout_secs: default_request_timeout_secs(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("comic-vault")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = toml::from_str("archive_url = \"https://mirror.example.org\"")
            .unwrap();
        assert_eq!(config.archive_url, "https://mirror.example.org");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.fetch_concurrency, 4);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config {
            db_path: "/tmp/comics.sqlite".to_string(),
            image_dir: "/tmp/images".to_string(),
            archive_url: "https://xkcd.com".to_string(),
            request_timeout_secs: 10,
            fetch_concurrency: 8,
        };
        let serialized = toml::to_string_pretty(&config).unwrap();
        let restored: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(restored.db_path, config.db_path);
        assert_eq!(restored.fetch_concurrency, 8);
    }
}
