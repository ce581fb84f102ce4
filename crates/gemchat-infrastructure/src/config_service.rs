//! Configuration service implementation.
//!
//! Loads `ChatConfig` from `config.toml` and the API key from `secret.json`,
//! both under the gemchat config directory.

use crate::paths::GemchatPaths;
use gemchat_core::config::ChatConfig;
use gemchat_core::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Root structure of `secret.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretConfig {
    #[serde(default)]
    pub gemini: Option<GeminiSecret>,
}

/// Gemini API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSecret {
    pub api_key: String,
}

/// Configuration service that loads and caches the root configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    paths: GemchatPaths,
    /// Cached configuration loaded from file.
    config: Arc<RwLock<Option<ChatConfig>>>,
}

impl ConfigService {
    pub fn new(paths: GemchatPaths) -> Self {
        Self {
            paths,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading it from file if not cached.
    ///
    /// A missing file is created with the defaults so users have something to
    /// edit.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Serialization` if the file exists but is not valid
    /// TOML, or `ChatError::Config` if the path cannot be resolved.
    pub fn get_config(&self) -> Result<ChatConfig> {
        if let Some(cached) = self
            .config
            .read()
            .map_err(|e| ChatError::internal(format!("Config cache poisoned: {}", e)))?
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let loaded = self.load_config()?;
        *self
            .config
            .write()
            .map_err(|e| ChatError::internal(format!("Config cache poisoned: {}", e)))? =
            Some(loaded.clone());
        Ok(loaded)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        if let Ok(mut cached) = self.config.write() {
            *cached = None;
        }
    }

    fn load_config(&self) -> Result<ChatConfig> {
        let config_path = self
            .paths
            .config_file()
            .map_err(|e| ChatError::config(e.to_string()))?;

        if !config_path.exists() {
            let defaults = ChatConfig::default();
            if let Err(e) = write_default_config(&config_path, &defaults) {
                tracing::warn!(
                    "Failed to write default config to {}: {}",
                    config_path.display(),
                    e
                );
            }
            return Ok(defaults);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: ChatConfig = toml::from_str(&content)?;
        tracing::debug!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Loads the Gemini API key from `secret.json`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(key))`: Key found
    /// - `Ok(None)`: File missing or no `gemini` section
    /// - `Err(_)`: File exists but cannot be read or parsed
    pub fn load_api_key(&self) -> Result<Option<String>> {
        let secret_path = self
            .paths
            .secret_file()
            .map_err(|e| ChatError::config(e.to_string()))?;

        if !secret_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&secret_path)?;
        let secrets: SecretConfig = serde_json::from_str(&content)?;
        Ok(secrets
            .gemini
            .map(|gemini| gemini.api_key)
            .filter(|key| !key.trim().is_empty()))
    }
}

fn write_default_config(path: &Path, config: &ChatConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
