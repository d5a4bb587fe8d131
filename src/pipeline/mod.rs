//! Orchestration of a single publish run.
//!
//! Order: precondition checks, auth, container resolution, extraction,
//! audio publish, then thumbnail fetch and publish under the configured
//! [`MissingThumbnailPolicy`]. Every local resource is acquired through
//! [`TempResources`] and released on every exit path.

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineSettings;
use crate::error::PipelineError;
use crate::extractor::{ExtractedMedia, ExtractorAdapter, MediaExtractor};
use crate::namespace::NamespaceResolver;
use crate::publisher::{ArtifactPublisher, PublishRetryPolicy, ShareableLink};
use crate::server::metrics;
use crate::storage::{AuthProvider, AuthToken, StorageBackend};
use crate::temp_resources::{TempResourceStats, TempResources};
use crate::thumbnail::ThumbnailFetcher;

/// What to do when no thumbnail can be published.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum MissingThumbnailPolicy {
    /// Fail the whole request.
    #[default]
    Fail,
    /// Return the audio links alone, noting why the thumbnail is absent.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub source_uri: String,
}

impl SourceRequest {
    pub fn new(source_uri: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub filename: String,
    pub audio_links: Vec<ShareableLink>,
    pub thumbnail_links: Vec<ShareableLink>,
    /// Set when a partial result was returned without a thumbnail.
    pub thumbnail_omitted: Option<String>,
}

impl PipelineResult {
    pub fn primary_audio_link(&self) -> Option<&str> {
        self.audio_links.first().map(|link| link.url.as_str())
    }

    pub fn primary_thumbnail_link(&self) -> Option<&str> {
        self.thumbnail_links.first().map(|link| link.url.as_str())
    }
}

/// Out-of-band credentials, checked at the start of every run.
#[derive(Clone, Default)]
pub struct PipelineCredentials {
    pub auth: Option<Arc<dyn AuthProvider>>,
    /// Base64-encoded cookie jar for the extractor.
    pub cookies: Option<String>,
}

/// External capabilities the pipeline depends on.
#[derive(Clone)]
pub struct PipelineCollaborators {
    pub extractor: Arc<dyn MediaExtractor>,
    pub thumbnails: Arc<dyn ThumbnailFetcher>,
    pub backend: Arc<dyn StorageBackend>,
}

pub struct PipelineOrchestrator {
    settings: PipelineSettings,
    credentials: PipelineCredentials,
    extractor: ExtractorAdapter,
    thumbnails: Arc<dyn ThumbnailFetcher>,
    resolver: NamespaceResolver,
    publisher: ArtifactPublisher,
    resources: TempResources,
}

impl PipelineOrchestrator {
    pub fn new(
        settings: PipelineSettings,
        retry_policy: PublishRetryPolicy,
        credentials: PipelineCredentials,
        collaborators: PipelineCollaborators,
        resources: TempResources,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            extractor: ExtractorAdapter::new(collaborators.extractor, &settings.audio_format),
            thumbnails: collaborators.thumbnails,
            resolver: NamespaceResolver::new(collaborators.backend.clone()),
            publisher: ArtifactPublisher::new(collaborators.backend, retry_policy, cancel),
            settings,
            credentials,
            resources,
        }
    }

    pub fn resource_stats(&self) -> TempResourceStats {
        self.resources.stats()
    }

    pub async fn run(&self, request: &SourceRequest) -> Result<PipelineResult, PipelineError> {
        let result = self.run_inner(request).await;
        match &result {
            Ok(outcome) => {
                let label = if outcome.thumbnail_omitted.is_some() {
                    "partial"
                } else {
                    "success"
                };
                info!(
                    "Published {:?} from {} ({} audio link(s), {} thumbnail link(s))",
                    outcome.filename,
                    request.source_uri,
                    outcome.audio_links.len(),
                    outcome.thumbnail_links.len()
                );
                metrics::record_pipeline_outcome(label);
            }
            Err(err) => {
                warn!(
                    "Pipeline for {} failed ({}): {}",
                    request.source_uri,
                    err.kind(),
                    err
                );
                metrics::record_pipeline_outcome(err.kind());
            }
        }
        result
    }

    async fn run_inner(&self, request: &SourceRequest) -> Result<PipelineResult, PipelineError> {
        let (auth, cookies) = self.check_preconditions()?;

        let token = auth.token().await.map_err(PipelineError::Authentication)?;

        let audio_container = self
            .resolver
            .resolve(&token, &self.settings.audio_container)
            .await?;
        let image_container = self
            .resolver
            .resolve(&token, &self.settings.image_container)
            .await?;

        let cookie_file = self
            .resources
            .acquire_file(".txt", &cookies)
            .map_err(PipelineError::TempResource)?;
        let extracted = self
            .extractor
            .extract(
                &request.source_uri,
                Some(cookie_file.path()),
                &self.resources,
            )
            .await;
        cookie_file.release();

        let ExtractedMedia {
            audio,
            suggested_filename,
            thumbnail_locator,
        } = extracted?;

        let audio_report = self
            .publisher
            .publish(&token, audio_container, &suggested_filename, &audio)
            .await;
        audio.release();
        let audio_report = audio_report?;

        let (thumbnail_links, thumbnail_omitted) = match self
            .publish_thumbnail(&token, image_container, thumbnail_locator.as_deref())
            .await
        {
            Ok(links) => (links, None),
            Err(err) => match self.settings.missing_thumbnail {
                MissingThumbnailPolicy::Fail => return Err(err),
                MissingThumbnailPolicy::Partial => {
                    warn!(
                        "Returning audio only for {}: {}",
                        request.source_uri, err
                    );
                    (Vec::new(), Some(err.to_string()))
                }
            },
        };

        Ok(PipelineResult {
            filename: suggested_filename,
            audio_links: audio_report.links,
            thumbnail_links,
            thumbnail_omitted,
        })
    }

    /// Fail fast on missing credentials, before any remote or local work.
    fn check_preconditions(&self) -> Result<(Arc<dyn AuthProvider>, Vec<u8>), PipelineError> {
        let auth = self.credentials.auth.clone().ok_or_else(|| {
            PipelineError::Configuration(
                "missing storage credentials: set PCLOUD_AUTH, or PCLOUD_USERNAME and PCLOUD_PASSWORD"
                    .to_string(),
            )
        })?;
        let encoded = self.credentials.cookies.as_deref().ok_or_else(|| {
            PipelineError::Configuration("Missing YOUTUBE_COOKIES env var".to_string())
        })?;
        let cookies = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                PipelineError::Configuration(format!("YOUTUBE_COOKIES is not valid base64: {}", e))
            })?;
        Ok((auth, cookies))
    }

    async fn publish_thumbnail(
        &self,
        token: &AuthToken,
        container_id: u64,
        locator: Option<&str>,
    ) -> Result<Vec<ShareableLink>, PipelineError> {
        let locator = locator.ok_or(PipelineError::MissingThumbnail)?;
        let thumbnail = self.thumbnails.fetch(locator).await?;

        let bytes = self.resources.acquire_buffer(thumbnail.bytes);
        let report = self
            .publisher
            .publish(token, container_id, &thumbnail.filename, &bytes)
            .await;
        bytes.release();

        Ok(report?.links)
    }
}
