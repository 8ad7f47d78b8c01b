//! Application settings.
//!
//! Read from `settings.toml` in the platform config directory. Every field has a
//! default, so a missing file (or a partial one) yields the stock behaviour:
//! top-3 predictions, 224 px MobileNetV2 input, English Wikipedia.

use crate::error::AppError;
use crate::services::classifier::model_manager::ModelConfig;
use crate::services::knowledge::LookupConfig;
use crate::services::speech::SpeechConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SETTINGS_FILE: &str = "settings.toml";

/// Startup artwork shown behind the main panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Directory searched for the asset files; relative paths resolve against the working directory
    #[serde(default = "default_asset_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_logo")]
    pub logo: String,
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_background() -> String {
    "gui_background.jpg".to_string()
}
fn default_logo() -> String {
    "logo-no-background.png".to_string()
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            dir: default_asset_dir(),
            background: default_background(),
            logo: default_logo(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Number of predictions shown in the "Top Predicted Objects" panel
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub assets: AssetConfig,
}

fn default_top_k() -> usize {
    3
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            model: ModelConfig::default(),
            lookup: LookupConfig::default(),
            speech: SpeechConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `settings.toml` from `config_dir`, falling back to defaults when the file is absent.
    pub fn load_from_dir(config_dir: &Path) -> Result<Self, AppError> {
        Self::load(&config_dir.join(SETTINGS_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        info!("Settings loaded from {}", path.display());
        Ok(config.validated())
    }

    fn validated(mut self) -> Self {
        if self.top_k == 0 {
            self.top_k = default_top_k();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::model_manager::LoadPolicy;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.model.input.size, 224);
        assert_eq!(config.lookup.language, "en");
        assert_eq!(config.assets.background, "gui_background.jpg");
        assert_eq!(config.assets.logo, "logo-no-background.png");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.top_k, 3);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "top_k = 5\n\n[lookup]\nlanguage = \"de\"\n\n[model]\nload_policy = \"per_request\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.lookup.language, "de");
        assert_eq!(config.model.load_policy, LoadPolicy::PerRequest);
        assert_eq!(config.model.input.size, 224);
    }

    #[test]
    fn test_zero_top_k_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "top_k = 0\n").unwrap();
        let config = AppConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.top_k, 3);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "top_k = \"three\"").unwrap();
        let err = AppConfig::load_from_dir(dir.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Config);
    }
}
