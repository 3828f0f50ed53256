use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary. When unset the launcher searches the usual install locations.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
}

fn default_engine() -> String {
    "chrome".to_string()
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    800
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            path: None,
            engine: default_engine(),
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// How long a headed run waits for the user to finish logging in.
    #[serde(default = "default_login_wait_secs")]
    pub login_wait_secs: u64,
    #[serde(default = "default_editor_wait_secs")]
    pub editor_wait_secs: u64,
    #[serde(default = "default_autosave_wait_secs")]
    pub autosave_wait_secs: u64,
    #[serde(default = "default_headed_linger_secs")]
    pub headed_linger_secs: u64,
    #[serde(default = "default_upload_wait_secs")]
    pub upload_wait_secs: u64,
}

fn default_login_wait_secs() -> u64 {
    180
}

fn default_editor_wait_secs() -> u64 {
    15
}

fn default_autosave_wait_secs() -> u64 {
    5
}

fn default_headed_linger_secs() -> u64 {
    10
}

fn default_upload_wait_secs() -> u64 {
    3
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_wait_secs: default_login_wait_secs(),
            editor_wait_secs: default_editor_wait_secs(),
            autosave_wait_secs: default_autosave_wait_secs(),
            headed_linger_secs: default_headed_linger_secs(),
            upload_wait_secs: default_upload_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Overrides the persistent profile location from [`Paths::profile_dir`].
    #[serde(default)]
    pub profile_dir: Option<String>,
}

fn default_base_url() -> String {
    "https://note.com".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            browser: BrowserConfig::default(),
            timeouts: TimeoutConfig::default(),
            profile_dir: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url())
    }

    pub fn new_note_url(&self) -> String {
        format!("{}/notes/new", self.base_url())
    }

    pub fn profile_dir(&self, paths: &Paths) -> PathBuf {
        match self.profile_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => paths.profile_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.base_url(), "https://note.com");
        assert_eq!(cfg.browser.window_width, 1280);
        assert_eq!(cfg.browser.window_height, 800);
        assert_eq!(cfg.timeouts.login_wait_secs, 180);
        assert_eq!(cfg.timeouts.editor_wait_secs, 15);
        assert_eq!(cfg.timeouts.autosave_wait_secs, 5);
        assert_eq!(cfg.timeouts.headed_linger_secs, 10);
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let raw = r#"{ "baseUrl": "http://localhost:8080/" }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.login_url(), "http://localhost:8080/login");
        assert_eq!(cfg.new_note_url(), "http://localhost:8080/notes/new");
    }

    #[test]
    fn test_profile_dir_override() {
        let paths = Paths::with_base(PathBuf::from("/base"));
        let mut cfg = Config::default();
        assert_eq!(cfg.profile_dir(&paths), PathBuf::from("/base/chrome_profile"));
        cfg.profile_dir = Some("  ".to_string());
        assert_eq!(cfg.profile_dir(&paths), PathBuf::from("/base/chrome_profile"));
        cfg.profile_dir = Some("/srv/profile".to_string());
        assert_eq!(cfg.profile_dir(&paths), PathBuf::from("/srv/profile"));
    }

    #[test]
    fn test_save_and_load_or_default() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        assert_eq!(Config::load_or_default(&paths).unwrap().timeouts.upload_wait_secs, 3);

        let mut cfg = Config::default();
        cfg.timeouts.login_wait_secs = 30;
        cfg.save(&paths.config_file()).unwrap();
        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.timeouts.login_wait_secs, 30);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
