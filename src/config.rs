use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_CONFIG_PATH").unwrap_or("facematch.toml"))
});

/// What `serve` does when the store file is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingStore {
    /// Serve with an empty gallery; every query gets zero matches.
    #[default]
    Empty,
    /// Refuse to start.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector: PathBuf,
    pub encoder: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            encoder: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub top_k: usize,
    pub gallery_dir: PathBuf,
    pub public_dir: PathBuf,
    pub store_path: PathBuf,
    pub listen: String,
    pub missing_store: MissingStore,
    pub max_upload_bytes: usize,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            top_k: 4,
            gallery_dir: PathBuf::from("dataset/Known"),
            public_dir: PathBuf::from("static"),
            store_path: PathBuf::from("embeddings/known_embeddings.bin"),
            listen: "127.0.0.1:5000".to_string(),
            missing_store: MissingStore::Empty,
            max_upload_bytes: 10 * 1024 * 1024,
            model: ModelConfig::default(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
