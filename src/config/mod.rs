mod file_config;

pub use file_config::{FileConfig, PipelineConfig, PublishConfig};

use crate::pipeline::MissingThumbnailPolicy;
use crate::server::RequestsLoggingLevel;
use crate::storage::LinkStrategy;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "https://api.pcloud.com";

/// Upper bound for any single publish delay setting, in seconds.
pub const MAX_PUBLISH_DELAY_SECS: f64 = 86_400.0;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub api_base_url: String,
    pub request_timeout_sec: u64,
    pub yt_dlp_path: String,
    pub work_dir: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_sec: 300,
            yt_dlp_path: "yt-dlp".to_string(),
            work_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub api_base_url: String,
    pub request_timeout_sec: u64,
    pub yt_dlp_path: String,
    pub work_dir: PathBuf,

    // Feature configs (with defaults)
    pub publish: PublishSettings,
    pub pipeline: PipelineSettings,

    // Out-of-band credentials
    pub secrets: EnvSecrets,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments, optional TOML file config and
    /// environment secrets. TOML values override CLI values where present.
    ///
    /// Missing secrets are not an error here; they are checked per request.
    pub fn resolve(
        cli: &CliConfig,
        file_config: Option<FileConfig>,
        secrets: EnvSecrets,
    ) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port != 0 && port == metrics_port {
            bail!("port and metrics_port must differ (both are {})", port);
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let api_base_url = file
            .api_base_url
            .unwrap_or_else(|| cli.api_base_url.clone());
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            bail!("api_base_url must be an http(s) URL: {:?}", api_base_url);
        }

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        if request_timeout_sec == 0 {
            bail!("request_timeout_sec must be greater than 0");
        }

        let yt_dlp_path = file.yt_dlp_path.unwrap_or_else(|| cli.yt_dlp_path.clone());
        let work_dir = file
            .work_dir
            .map(PathBuf::from)
            .or_else(|| cli.work_dir.clone())
            .unwrap_or_else(std::env::temp_dir);
        if work_dir.exists() && !work_dir.is_dir() {
            bail!("work_dir is not a directory: {:?}", work_dir);
        }

        // Publish settings - merge file config with defaults
        let publish_file = file.publish.unwrap_or_default();
        let publish_defaults = PublishSettings::default();
        let link_strategy = match publish_file.link_strategy {
            Some(s) => match LinkStrategy::from_str(&s, true) {
                Ok(strategy) => strategy,
                Err(_) => bail!(
                    "Invalid publish.link_strategy {:?} (expected \"direct\" or \"public_code\")",
                    s
                ),
            },
            None => publish_defaults.link_strategy,
        };
        let publish = PublishSettings {
            max_attempts: publish_file
                .max_attempts
                .unwrap_or(publish_defaults.max_attempts),
            initial_delay_secs: publish_file
                .initial_delay_secs
                .unwrap_or(publish_defaults.initial_delay_secs),
            delay_increment_secs: publish_file
                .delay_increment_secs
                .unwrap_or(publish_defaults.delay_increment_secs),
            link_strategy,
        };
        publish.validate()?;

        // Pipeline settings - merge file config with defaults
        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline_defaults = PipelineSettings::default();
        let missing_thumbnail = match pipeline_file.missing_thumbnail {
            Some(s) => match MissingThumbnailPolicy::from_str(&s, true) {
                Ok(policy) => policy,
                Err(_) => bail!(
                    "Invalid pipeline.missing_thumbnail {:?} (expected \"fail\" or \"partial\")",
                    s
                ),
            },
            None => pipeline_defaults.missing_thumbnail,
        };
        let pipeline = PipelineSettings {
            audio_container: pipeline_file
                .audio_container
                .unwrap_or(pipeline_defaults.audio_container),
            image_container: pipeline_file
                .image_container
                .unwrap_or(pipeline_defaults.image_container),
            missing_thumbnail,
            audio_format: pipeline_file
                .audio_format
                .unwrap_or(pipeline_defaults.audio_format),
            audio_quality: pipeline_file
                .audio_quality
                .unwrap_or(pipeline_defaults.audio_quality),
        };
        pipeline.validate()?;

        Ok(Self {
            port,
            metrics_port,
            logging_level,
            api_base_url,
            request_timeout_sec,
            yt_dlp_path,
            work_dir,
            publish,
            pipeline,
            secrets,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub delay_increment_secs: f64,
    pub link_strategy: LinkStrategy,
}

impl PublishSettings {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("publish.max_attempts must be at least 1");
        }
        for (name, value) in [
            ("initial_delay_secs", self.initial_delay_secs),
            ("delay_increment_secs", self.delay_increment_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("publish.{} must be a non-negative number, got {}", name, value);
            }
            if value > MAX_PUBLISH_DELAY_SECS {
                bail!(
                    "publish.{} must be at most {} seconds, got {}",
                    name,
                    MAX_PUBLISH_DELAY_SECS,
                    value
                );
            }
        }
        Ok(())
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_secs: 2.0,
            delay_increment_secs: 1.5,
            link_strategy: LinkStrategy::Direct,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub audio_container: String,
    pub image_container: String,
    pub missing_thumbnail: MissingThumbnailPolicy,
    pub audio_format: String,
    pub audio_quality: String,
}

impl PipelineSettings {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("audio_container", &self.audio_container),
            ("image_container", &self.image_container),
            ("audio_format", &self.audio_format),
        ] {
            if value.trim().is_empty() {
                bail!("pipeline.{} must not be empty", name);
            }
        }
        if self.audio_quality.parse::<u32>().is_err() {
            bail!(
                "pipeline.audio_quality must be a bitrate in kbps, got {:?}",
                self.audio_quality
            );
        }
        Ok(())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            audio_container: "songs".to_string(),
            image_container: "imgs".to_string(),
            missing_thumbnail: MissingThumbnailPolicy::Fail,
            audio_format: "mp3".to_string(),
            audio_quality: "192".to_string(),
        }
    }
}

/// How the process authenticates against the storage backend.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Token(String),
    Login { username: String, password: String },
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Secrets supplied through the process environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvSecrets {
    pub pcloud_auth: Option<String>,
    pub pcloud_username: Option<String>,
    pub pcloud_password: Option<String>,
    /// Base64-encoded cookie jar handed to the extractor.
    pub youtube_cookies: Option<String>,
}

impl EnvSecrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            pcloud_auth: get("PCLOUD_AUTH"),
            pcloud_username: get("PCLOUD_USERNAME"),
            pcloud_password: get("PCLOUD_PASSWORD"),
            youtube_cookies: get("YOUTUBE_COOKIES"),
        }
    }

    /// A static token wins over a username/password pair.
    pub fn credential_source(&self) -> Option<CredentialSource> {
        if let Some(token) = &self.pcloud_auth {
            return Some(CredentialSource::Token(token.clone()));
        }
        match (&self.pcloud_username, &self.pcloud_password) {
            (Some(username), Some(password)) => Some(CredentialSource::Login {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for EnvSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("EnvSecrets")
            .field("pcloud_auth", &set(&self.pcloud_auth))
            .field("pcloud_username", &self.pcloud_username)
            .field("pcloud_password", &set(&self.pcloud_password))
            .field("youtube_cookies", &set(&self.youtube_cookies))
            .finish()
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
