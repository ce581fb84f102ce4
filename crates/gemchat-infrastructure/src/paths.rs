//! Unified path management for gemchat.
//!
//! All paths are resolved via `AppPaths` from the version-migrate crate so the
//! conversation store and the configuration files agree on one location.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/gemchat/           # Config directory (AppPaths default)
//! ├── config.toml              # Application configuration
//! ├── secret.json              # API keys
//! ├── conversations/           # One file per conversation (AsyncDirStorage)
//! └── logs/                    # Application logs
//!     └── gemchat.log.YYYY-MM-DD
//! ```

use std::path::{Path, PathBuf};
use version_migrate::{AppPaths, PathStrategy};

const APP_NAME: &str = "gemchat";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

/// Path resolution for gemchat, optionally rooted at a custom base directory.
///
/// With no base directory the platform config directory is used. A custom
/// base puts everything under that directory, which is what tests use.
#[derive(Debug, Clone, Default)]
pub struct GemchatPaths {
    base_dir: Option<PathBuf>,
}

impl GemchatPaths {
    pub fn new(base_dir: Option<&Path>) -> Self {
        Self {
            base_dir: base_dir.map(Path::to_path_buf),
        }
    }

    /// Returns an AppPaths instance whose data directory is the config directory.
    ///
    /// Conversations are stored next to the configuration files rather than in
    /// the platform data directory.
    pub fn app_paths(&self) -> Result<AppPaths, PathError> {
        Ok(AppPaths::new(APP_NAME).data_strategy(PathStrategy::CustomBase(self.config_dir()?)))
    }

    /// Returns the gemchat configuration directory (e.g. `~/.config/gemchat/`).
    pub fn config_dir(&self) -> Result<PathBuf, PathError> {
        if let Some(base) = &self.base_dir {
            return Ok(base.clone());
        }
        AppPaths::new(APP_NAME)
            .config_dir()
            .map_err(|_| PathError::HomeDirNotFound)
    }

    /// Returns the path to `config.toml`.
    pub fn config_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("config.toml"))
    }

    /// Returns the path to `secret.json`.
    ///
    /// # Security Note
    ///
    /// Keep this file at mode 600; it holds the API key.
    pub fn secret_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("secret.json"))
    }

    /// Returns the log directory.
    pub fn logs_dir(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_base_dir() {
        let paths = GemchatPaths::new(Some(Path::new("/tmp/gemchat-test")));
        assert_eq!(
            paths.config_file().unwrap(),
            PathBuf::from("/tmp/gemchat-test/config.toml")
        );
        assert_eq!(
            paths.secret_file().unwrap(),
            PathBuf::from("/tmp/gemchat-test/secret.json")
        );
        assert_eq!(
            paths.logs_dir().unwrap(),
            PathBuf::from("/tmp/gemchat-test/logs")
        );
    }
}
