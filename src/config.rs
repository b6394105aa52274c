use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Album roots registered automatically when the daemon starts.
    #[serde(default)]
    pub albums: Vec<PathBuf>,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub process: ProcessConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_path")]
    pub path: PathBuf,

    /// Target widths in pixels. The smallest one is served inline.
    #[serde(default = "default_thumb_sizes")]
    pub sizes: Vec<u32>,
}

fn default_thumb_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("medialib/thumbnails")
}

fn default_thumb_sizes() -> Vec<u32> {
    vec![200, 800]
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            path: default_thumb_path(),
            sizes: default_thumb_sizes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Number of files processed concurrently.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Wall-clock budget for one run, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub environment: Environment,

    /// Pause between dispatches outside production.
    #[serde(default = "default_dev_delay_ms")]
    pub dev_delay_ms: u64,

    /// Compute a SHA-256 of every file's content during metadata passes.
    #[serde(default)]
    pub hash_content: bool,

    /// Daemon interval between runs, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_threads() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    25 * 60
}

fn default_dev_delay_ms() -> u64 {
    250
}

fn default_interval_secs() -> u64 {
    30 * 60
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            timeout_secs: default_timeout_secs(),
            environment: Environment::default(),
            dev_delay_ms: default_dev_delay_ms(),
            hash_content: false,
            interval_secs: default_interval_secs(),
        }
    }
}

impl ProcessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffprobe: default_ffprobe(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_video_extensions() -> Vec<String> {
    ["mp4", "mov", "m4v", "mkv", "avi", "webm", "3gp", "mts", "wmv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_video_extensions(),
            image_extensions: default_image_extensions(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medialib")
        .join("medialib.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            albums: Vec::new(),
            thumbnails: ThumbnailConfig::default(),
            process: ProcessConfig::default(),
            tools: ToolsConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults there on first use.
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

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("medialib")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MEDIALIB_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            albums = ["/srv/media/family"]

            [process]
            threads = 8
            environment = "development"
            "#,
        )
        .unwrap();

        assert_eq!(config.albums, vec![PathBuf::from("/srv/media/family")]);
        assert_eq!(config.process.threads, 8);
        assert!(!config.process.is_production());
        assert_eq!(config.process.timeout_secs, default_timeout_secs());
        assert_eq!(config.thumbnails.sizes, vec![200, 800]);
        assert!(config.media.video_extensions.contains(&"mp4".to_string()));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.thumbnails.sizes = vec![120];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.thumbnails.sizes, vec![120]);
        assert_eq!(loaded.process.environment, Environment::Production);
    }
}
