use crate::core::duplicate::{DuplicatePolicy, DEFAULT_THRESHOLD};
use crate::services::export::ExportFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILENAME: &str = "config.json";
pub const DATABASE_FILENAME: &str = "stampd.db";

pub const DATA_DIR_ENV: &str = "STAMPD_DATA_DIR";
pub const DB_PATH_ENV: &str = "STAMPD_DB_PATH";
pub const OLLAMA_URL_ENV: &str = "OLLAMA_URL";

const MAX_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub csv: bool,
    pub xlsx: bool,
    pub pdf: bool,
    pub ebay: bool,
    pub hipstamp: bool,
    pub colnect: bool,
    pub stampworld: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            csv: true,
            xlsx: true,
            pdf: true,
            ebay: false,
            hipstamp: false,
            colnect: false,
            stampworld: false,
        }
    }
}

impl ExportOptions {
    pub fn allows(&self, format: ExportFormat) -> bool {
        match format {
            ExportFormat::Csv => self.csv,
            ExportFormat::Xlsx => self.xlsx,
            ExportFormat::Pdf => self.pdf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryOptions {
    pub enable_search: bool,
}

impl Default for GalleryOptions {
    fn default() -> Self {
        Self { enable_search: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ai_model: String,
    pub ai_url: String,
    pub ai_timeout_secs: u64,
    pub duplicate_policy: DuplicatePolicy,
    pub duplicate_threshold: u32,
    pub export_options: ExportOptions,
    pub gallery: GalleryOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_model: "phi3".to_string(),
            ai_url: "http://localhost:11434".to_string(),
            ai_timeout_secs: 60,
            duplicate_policy: DuplicatePolicy::default(),
            duplicate_threshold: DEFAULT_THRESHOLD,
            export_options: ExportOptions::default(),
            gallery: GalleryOptions::default(),
        }
    }
}

impl AppConfig {
    /// Read the config at `path`, first writing the defaults there if the
    /// file does not exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("Writing default configuration to {}", path.display());
            Self::default().save(path)?;
        }
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ai_model.trim().is_empty() {
            return Err(ConfigError::Invalid("ai_model must not be empty".to_string()));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.ai_timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "ai_timeout_secs must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECS, self.ai_timeout_secs
            )));
        }
        if self.duplicate_threshold > 64 {
            return Err(ConfigError::Invalid(format!(
                "duplicate_threshold must be at most 64 bits, got {}",
                self.duplicate_threshold
            )));
        }
        Ok(())
    }

    /// The model server URL, with `override_url` (from `OLLAMA_URL`) taking
    /// precedence when set and non-empty.
    pub fn ai_url(&self, override_url: Option<&str>) -> String {
        match override_url.map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => self.ai_url.clone(),
        }
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }
}

/// Where everything lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub images_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub backups_dir: PathBuf,
}

impl Paths {
    /// Data directory from the command line, else `STAMPD_DATA_DIR`, else the
    /// platform data directory. `STAMPD_DB_PATH` relocates the database.
    pub fn from_env(cli_data_dir: Option<PathBuf>) -> Self {
        let env_data_dir = std::env::var_os(DATA_DIR_ENV).map(PathBuf::from);
        let env_db_path = std::env::var_os(DB_PATH_ENV).map(PathBuf::from);
        Self::resolve(cli_data_dir.or(env_data_dir), env_db_path)
    }

    pub fn resolve(data_dir: Option<PathBuf>, db_path: Option<PathBuf>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        Self {
            config_path: data_dir.join(CONFIG_FILENAME),
            db_path: db_path.unwrap_or_else(|| data_dir.join(DATABASE_FILENAME)),
            images_dir: data_dir.join("images"),
            thumbnails_dir: data_dir.join("thumbnails"),
            logs_dir: data_dir.join("logs"),
            backups_dir: data_dir.join("backups"),
            data_dir,
        }
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            &self.data_dir,
            &self.images_dir,
            &self.thumbnails_dir,
            &self.logs_dir,
            &self.backups_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stampd")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILENAME);

        let config = AppConfig::load_or_init(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // Idempotent.
        assert_eq!(AppConfig::load_or_init(&path).unwrap(), config);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.ai_model, "phi3");
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Perceptual);
        assert_eq!(config.duplicate_threshold, 5);
        assert!(config.export_options.csv && config.export_options.xlsx && config.export_options.pdf);
        assert!(!config.export_options.ebay);
        assert!(config.gallery.enable_search);
        assert_eq!(config.ai_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);
        fs::write(
            &path,
            r#"{"ai_model": "llava", "export_options": {"pdf": false}, "duplicate_policy": "exact"}"#,
        )
        .unwrap();

        let config = AppConfig::load_or_init(&path).unwrap();
        assert_eq!(config.ai_model, "llava");
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Exact);
        assert!(!config.export_options.pdf);
        assert!(config.export_options.csv);
        assert!(!config.export_options.allows(ExportFormat::Pdf));
        assert!(config.export_options.allows(ExportFormat::Xlsx));
        assert_eq!(config.ai_timeout_secs, 60);
    }

    #[test]
    fn test_save_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);
        let config = AppConfig {
            ai_model: "bakllava".to_string(),
            duplicate_threshold: 8,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load_or_init(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);

        fs::write(&path, r#"{"ai_timeout_secs": 0}"#).unwrap();
        assert!(matches!(AppConfig::load_or_init(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, r#"{"ai_model": "  "}"#).unwrap();
        assert!(matches!(AppConfig::load_or_init(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, r#"{"duplicate_policy": "fuzzy"}"#).unwrap();
        assert!(matches!(AppConfig::load_or_init(&path), Err(ConfigError::Json(_))));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(AppConfig::load_or_init(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_ai_url_override() {
        let config = AppConfig::default();
        assert_eq!(config.ai_url(None), "http://localhost:11434");
        assert_eq!(config.ai_url(Some("")), "http://localhost:11434");
        assert_eq!(config.ai_url(Some("http://gpu-box:11434")), "http://gpu-box:11434");
    }

    #[test]
    fn test_paths_layout() {
        let paths = Paths::resolve(Some(PathBuf::from("/srv/stamps")), None);
        assert_eq!(paths.db_path, PathBuf::from("/srv/stamps/stampd.db"));
        assert_eq!(paths.config_path, PathBuf::from("/srv/stamps/config.json"));
        assert_eq!(paths.images_dir, PathBuf::from("/srv/stamps/images"));
        assert_eq!(paths.backups_dir, PathBuf::from("/srv/stamps/backups"));

        let moved = Paths::resolve(
            Some(PathBuf::from("/srv/stamps")),
            Some(PathBuf::from("/tmp/other.db")),
        );
        assert_eq!(moved.db_path, PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::resolve(Some(temp_dir.path().join("data")), None);
        paths.ensure_directories().unwrap();
        assert!(paths.images_dir.is_dir());
        assert!(paths.thumbnails_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert!(paths.backups_dir.is_dir());
    }
}
