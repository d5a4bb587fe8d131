//! Media extraction: turns a source URI into audio bytes plus metadata.
//!
//! [`MediaExtractor`] is the external capability (yt-dlp in production);
//! [`ExtractorAdapter`] normalizes its output into [`ExtractedMedia`].

mod yt_dlp;

pub use yt_dlp::YtDlpExtractor;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::temp_resources::{TempBuffer, TempResources};

/// Characters that may not appear in a published filename.
const ILLEGAL_FILENAME_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Errors that can occur while extracting media from a source.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("source requires valid credentials: {0}")]
    CredentialsRejected(String),

    #[error("no usable audio stream: {0}")]
    NoAudio(String),

    #[error("extractor failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the external extractor reports for a source.
#[derive(Debug, Clone, Default)]
pub struct RawExtraction {
    pub audio: Vec<u8>,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// The external media extraction capability.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(
        &self,
        source_uri: &str,
        cookie_file: Option<&Path>,
    ) -> Result<RawExtraction, ExtractionError>;
}

/// Audio plus metadata owned by a single pipeline run.
#[derive(Debug)]
pub struct ExtractedMedia {
    pub audio: TempBuffer,
    pub suggested_filename: String,
    pub thumbnail_locator: Option<String>,
}

/// Invokes the extractor and normalizes its result.
pub struct ExtractorAdapter {
    extractor: Arc<dyn MediaExtractor>,
    audio_extension: String,
}

impl ExtractorAdapter {
    pub fn new(extractor: Arc<dyn MediaExtractor>, audio_extension: impl Into<String>) -> Self {
        Self {
            extractor,
            audio_extension: audio_extension.into(),
        }
    }

    pub async fn extract(
        &self,
        source_uri: &str,
        cookie_file: Option<&Path>,
        resources: &TempResources,
    ) -> Result<ExtractedMedia, ExtractionError> {
        debug!("Extracting media from {}", source_uri);
        let raw = self.extractor.extract(source_uri, cookie_file).await?;

        if raw.audio.is_empty() {
            return Err(ExtractionError::NoAudio(format!(
                "extractor produced no audio for {}",
                source_uri
            )));
        }

        let stem = sanitize_filename(raw.title.as_deref());
        let suggested_filename = format!("{}.{}", stem, self.audio_extension);
        let thumbnail_locator = raw
            .thumbnail_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        info!(
            "Extracted {} bytes of audio as {:?} (thumbnail: {})",
            raw.audio.len(),
            suggested_filename,
            thumbnail_locator.is_some()
        );

        Ok(ExtractedMedia {
            audio: resources.acquire_buffer(raw.audio),
            suggested_filename,
            thumbnail_locator,
        })
    }
}

/// Derive a filename stem from a reported title.
///
/// Illegal characters and control characters are dropped and surrounding
/// whitespace trimmed; an empty result falls back to a fresh UUID.
pub fn sanitize_filename(title: Option<&str>) -> String {
    let cleaned: String = title
        .unwrap_or_default()
        .chars()
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        cleaned.to_string()
    }
}
