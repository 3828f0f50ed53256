use std::path::PathBuf;

/// Environment variable overriding the base directory.
pub const HOME_ENV: &str = "NOTEDRAFT_HOME";

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Self::with_base(PathBuf::from(home));
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".notedraft"))
            .unwrap_or_else(|| PathBuf::from(".notedraft"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Persistent browser profile used when no exported auth state is supplied.
    pub fn profile_dir(&self) -> PathBuf {
        self.base.join("chrome_profile")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.profile_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_base() {
        let paths = Paths::with_base(PathBuf::from("/tmp/nd"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/nd/config.json"));
        assert_eq!(paths.profile_dir(), PathBuf::from("/tmp/nd/chrome_profile"));
    }

    #[test]
    fn test_ensure_dirs_creates_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(tmp.path().join("home"));
        paths.ensure_dirs().unwrap();
        assert!(paths.profile_dir().is_dir());
    }
}
