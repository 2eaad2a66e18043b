use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::classifier::DevicePreference;

const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Checkpoint manifest (JSON) produced for the classifier.
    pub model_path: PathBuf,
    pub upload_folder: PathBuf,
    pub static_dir: PathBuf,
    /// Upper bound on request payloads, in bytes.
    pub max_content_length: usize,
    pub allowed_extensions: Vec<String>,
    /// `auto`, `cpu`, `cuda`, `cuda:N` or `mps`.
    pub device: String,
    pub app_name: String,
    pub app_description: String,
    pub app_version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model_path: PathBuf::from("plant_disease_model.json"),
            upload_folder: PathBuf::from("uploads"),
            static_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/static")),
            max_content_length: 16 * 1024 * 1024,
            allowed_extensions: ["png", "jpg", "jpeg", "bmp", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            device: "auto".to_string(),
            app_name: "植物叶片病害识别系统".to_string(),
            app_description: "基于深度学习的植物叶片病害识别系统".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file named by `APP_CONFIG` (or
    /// `config/app.yaml` when present), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var("APP_CONFIG") {
            Ok(path) => Self::from_yaml_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_yaml_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.device_preference()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_value("PORT", &port)?;
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("UPLOAD_FOLDER") {
            self.upload_folder = PathBuf::from(path);
        }
        if let Some(path) = lookup("STATIC_DIR") {
            self.static_dir = PathBuf::from(path);
        }
        if let Some(limit) = lookup("MAX_CONTENT_LENGTH") {
            self.max_content_length = parse_value("MAX_CONTENT_LENGTH", &limit)?;
        }
        if let Some(device) = lookup("DEVICE") {
            self.device = device;
        }
        Ok(())
    }

    pub fn device_preference(&self) -> Result<DevicePreference, ConfigError> {
        self.device.parse().map_err(|_| ConfigError::InvalidValue {
            key: "device".to_string(),
            value: self.device.clone(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_content_mb(&self) -> usize {
        self.max_content_length / (1024 * 1024)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
