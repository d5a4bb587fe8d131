use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub api_base_url: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub yt_dlp_path: Option<String>,
    pub work_dir: Option<String>,

    // Feature configs
    pub publish: Option<PublishConfig>,
    pub pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PublishConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_secs: Option<f64>,
    pub delay_increment_secs: Option<f64>,
    /// Link strategy: "direct" or "public_code"
    pub link_strategy: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio_container: Option<String>,
    pub image_container: Option<String>,
    /// What to do when no thumbnail can be published: "fail" or "partial"
    pub missing_thumbnail: Option<String>,
    pub audio_format: Option<String>,
    pub audio_quality: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
