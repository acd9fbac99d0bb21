use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, Context, anyhow};

use crate::storage::{FileStore, StorageError};

/// Application configuration, read from `<config_dir>/tutorline/config.json`
/// and then overridden from the environment.
///
/// The webhook URL is not here: it is a user setting kept in durable storage
/// (see [`crate::settings::SettingsStore`]).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub site_password: Option<String>,
    #[serde(default)]
    pub signup_url: Option<String>,
    #[serde(default)]
    pub signup_api_key: Option<String>,
    /// Overrides the default storage file location.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::get_config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Non-empty `TUTORLINE_*` variables win over the file.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(password) = non_empty("TUTORLINE_SITE_PASSWORD") {
            self.site_password = Some(password);
        }
        if let Some(url) = non_empty("TUTORLINE_SIGNUP_URL") {
            self.signup_url = Some(url);
        }
        if let Some(key) = non_empty("TUTORLINE_SIGNUP_KEY") {
            self.signup_api_key = Some(key);
        }
        if let Some(path) = non_empty("TUTORLINE_STORAGE_PATH") {
            self.storage_path = Some(PathBuf::from(path));
        }
    }

    /// Durable storage at `storage_path`, or the default location.
    pub fn open_storage(&self) -> std::result::Result<FileStore, StorageError> {
        match &self.storage_path {
            Some(path) => Ok(FileStore::new(path)),
            None => FileStore::open_default(),
        }
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("tutorline").join("config.json"))
    }
}
