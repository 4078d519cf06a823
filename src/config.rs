use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub models: ModelConfig,

    #[serde(default)]
    pub inbox: InboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Maximum Euclidean distance for a probe to match an enrolled face.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    /// Enrollment is refused when the new face is this close to someone else.
    #[serde(default = "default_tolerance")]
    pub duplicate_tolerance: f32,

    /// How long a loaded gallery snapshot stays valid.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_tolerance() -> f32 {
    0.6
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            duplicate_tolerance: default_tolerance(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_models_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("rollcall/models")
}

fn default_intra_threads() -> usize {
    4
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: default_models_dir(),
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Directory the camera (or upload handler) drops captures into.
    #[serde(default = "default_inbox_path")]
    pub path: PathBuf,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Move handled captures into `<inbox>/processed`.
    #[serde(default = "default_move_processed")]
    pub move_processed: bool,

    /// Hour of day (0-23) the daemon starts marking.
    #[serde(default)]
    pub hours_start: Option<u8>,

    /// Hour of day (0-23) the daemon stops marking.
    #[serde(default)]
    pub hours_end: Option<u8>,
}

fn default_inbox_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("rollcall/inbox")
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "webp".to_string(),
        "bmp".to_string(),
    ]
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_move_processed() -> bool {
    true
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            path: default_inbox_path(),
            image_extensions: default_image_extensions(),
            poll_interval_secs: default_poll_interval_secs(),
            move_processed: default_move_processed(),
            hours_start: None,
            hours_end: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rollcall")
        .join("rollcall.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            recognition: RecognitionConfig::default(),
            models: ModelConfig::default(),
            inbox: InboxConfig::default(),
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` or the default location, writing defaults
    /// on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.database.sqlite_path
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rollcall")
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [recognition]
            tolerance = 0.45
            "#,
        )
        .unwrap();

        assert!((config.recognition.tolerance - 0.45).abs() < f32::EPSILON);
        assert!((config.recognition.duplicate_tolerance - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.recognition.cache_ttl_secs, 300);
        assert!(config.inbox.move_processed);
        assert!(config.inbox.image_extensions.contains(&"jpg".to_string()));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.inbox.hours_start = Some(7);
        config.inbox.hours_end = Some(16);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.inbox.hours_start, Some(7));
        assert_eq!(loaded.inbox.hours_end, Some(16));
        assert_eq!(loaded.database.sqlite_path, config.database.sqlite_path);
    }
}
