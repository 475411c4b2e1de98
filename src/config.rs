use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const ENV_BACKEND_URL: &str = "POETRY_SHELF_BACKEND_URL";
const ENV_ANON_KEY: &str = "POETRY_SHELF_ANON_KEY";
const ENV_OFFLINE: &str = "POETRY_SHELF_OFFLINE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Project URL of the hosted backend. Without one the app runs offline.
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub offline: bool,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("poetry-shelf");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("local.db").to_string_lossy().to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            db_path: default_db_path(),
            request_timeout_secs: default_request_timeout(),
            offline: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read the file at `path`, writing defaults there first if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("poetry-shelf")
            .join("config.toml")
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(ENV_BACKEND_URL).filter(|v| !v.is_empty()) {
            tracing::info!("{ENV_BACKEND_URL} set, overriding backend_url");
            self.backend_url = Some(url);
        }
        if let Some(key) = var(ENV_ANON_KEY).filter(|v| !v.is_empty()) {
            self.anon_key = Some(key);
        }
        if let Some(flag) = var(ENV_OFFLINE) {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.offline = true,
                "0" | "false" | "no" => self.offline = false,
                other => tracing::warn!("Invalid {ENV_OFFLINE} value: {other}"),
            }
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline || self.backend_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn writes_defaults_when_missing_then_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.request_timeout_secs, 30);

        let mut edited = created.clone();
        edited.backend_url = Some("https://example.supabase.co".into());
        edited.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, edited);
        assert!(!loaded.is_offline());
    }

    #[test]
    fn partial_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend_url = \"http://localhost:54321\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend_url.as_deref(), Some("http://localhost:54321"));
        assert!(config.anon_key.is_none());
        assert!(!config.offline);
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            (ENV_BACKEND_URL, "https://override.supabase.co"),
            (ENV_ANON_KEY, "anon-key"),
            (ENV_OFFLINE, "true"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend_url.as_deref(), Some("https://override.supabase.co"));
        assert_eq!(config.anon_key.as_deref(), Some("anon-key"));
        assert!(config.is_offline());
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "request_timeout_secs = \"soon\"").unwrap();
        assert!(matches!(Config::load_from(&path), Err(AppError::TomlDe(_))));
    }
}
