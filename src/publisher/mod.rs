//! Artifact publishing: upload once, then make public with bounded retry.
//!
//! State machine:
//!
//! ```text
//! Uploading -> Uploaded -> Publishing(n) -> Published
//!     |                        |  ^
//!     |                        +--+  retry with linear backoff while n < max
//!     +------------------------+---> Failed
//! ```
//!
//! Upload failures are terminal without retry. Publish failures are retried
//! because the backend may not have propagated the upload yet.

mod retry_policy;

pub use retry_policy::PublishRetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::metrics;
use crate::storage::{AuthToken, BackendError, PublishedLink, StorageBackend, StoredArtifact};

/// How a shareable link is meant to be consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    DirectStream,
    PublicPage,
}

/// A URL a third party can dereference without authentication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShareableLink {
    pub kind: LinkKind,
    pub url: String,
}

impl ShareableLink {
    fn direct(host: &str, path: &str) -> Self {
        let url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}{}", host, path)
        } else {
            format!("https://{}{}", host, path)
        };
        Self {
            kind: LinkKind::DirectStream,
            url,
        }
    }
}

impl From<PublishedLink> for Vec<ShareableLink> {
    fn from(link: PublishedLink) -> Self {
        match link {
            PublishedLink::DirectLink { host, path } => vec![ShareableLink::direct(&host, &path)],
            PublishedLink::CodeResolved {
                page_url,
                host,
                path,
                ..
            } => {
                let mut links = vec![ShareableLink::direct(&host, &path)];
                if let Some(url) = page_url {
                    links.push(ShareableLink {
                        kind: LinkKind::PublicPage,
                        url,
                    });
                }
                links
            }
        }
    }
}

/// Terminal failures of a publish run.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("upload of {filename:?} failed: {source}")]
    Upload {
        filename: String,
        source: BackendError,
    },

    #[error("making file {file_id} public failed after {attempts} attempt(s): {last}")]
    Exhausted {
        file_id: u64,
        attempts: u32,
        last: BackendError,
    },

    #[error("making file {file_id} public was cancelled after {attempts} attempt(s)")]
    Cancelled {
        file_id: u64,
        attempts: u32,
        last: Option<BackendError>,
    },
}

/// Outcome of a successful publish.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub artifact: StoredArtifact,
    pub links: Vec<ShareableLink>,
    /// Number of publish calls made, the successful one included.
    pub attempts: u32,
    /// Total backoff slept before the publish calls.
    pub waited: Duration,
}

#[derive(Debug)]
enum PublishState {
    Uploading,
    Uploaded(StoredArtifact),
    Publishing {
        artifact: StoredArtifact,
        attempt: u32,
        waited: Duration,
        last: Option<BackendError>,
    },
    Published(PublishReport),
    Failed(ArtifactError),
}

/// Uploads buffers and turns them into shareable links.
#[derive(Clone)]
pub struct ArtifactPublisher {
    backend: Arc<dyn StorageBackend>,
    policy: PublishRetryPolicy,
    cancel: CancellationToken,
}

impl ArtifactPublisher {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        policy: PublishRetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &PublishRetryPolicy {
        &self.policy
    }

    pub async fn publish(
        &self,
        auth: &AuthToken,
        container_id: u64,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PublishReport, ArtifactError> {
        let mut state = PublishState::Uploading;
        loop {
            debug!("Publishing {:?}: {}", filename, state.name());
            state = match state {
                PublishState::Uploading => {
                    match self
                        .backend
                        .upload_file(auth, container_id, filename, bytes)
                        .await
                    {
                        Ok(artifact) => PublishState::Uploaded(artifact),
                        Err(source) => PublishState::Failed(ArtifactError::Upload {
                            filename: filename.to_string(),
                            source,
                        }),
                    }
                }
                PublishState::Uploaded(artifact) => {
                    info!(
                        "Uploaded {:?} ({} bytes) as file {}",
                        filename,
                        bytes.len(),
                        artifact.backend_file_id
                    );
                    PublishState::Publishing {
                        artifact,
                        attempt: 1,
                        waited: Duration::ZERO,
                        last: None,
                    }
                }
                PublishState::Publishing {
                    artifact,
                    attempt,
                    waited,
                    last,
                } => self.attempt_publish(auth, artifact, attempt, waited, last).await,
                PublishState::Published(report) => {
                    metrics::record_publish_attempts("published", report.attempts);
                    return Ok(report);
                }
                PublishState::Failed(err) => {
                    let attempts = match &err {
                        ArtifactError::Upload { .. } => 0,
                        ArtifactError::Exhausted { attempts, .. }
                        | ArtifactError::Cancelled { attempts, .. } => *attempts,
                    };
                    metrics::record_publish_attempts("failed", attempts);
                    return Err(err);
                }
            };
        }
    }

    async fn attempt_publish(
        &self,
        auth: &AuthToken,
        artifact: StoredArtifact,
        attempt: u32,
        waited: Duration,
        last: Option<BackendError>,
    ) -> PublishState {
        let delay = self.policy.delay_before(attempt);
        if !self.sleep(delay).await {
            return PublishState::Failed(ArtifactError::Cancelled {
                file_id: artifact.backend_file_id,
                attempts: attempt - 1,
                last,
            });
        }
        let waited = waited + delay;

        let error = match self.backend.publish(auth, &artifact).await {
            Ok(published) if !published.is_empty() => {
                let links = published
                    .into_iter()
                    .flat_map(Vec::<ShareableLink>::from)
                    .collect();
                return PublishState::Published(PublishReport {
                    artifact,
                    links,
                    attempts: attempt,
                    waited,
                });
            }
            Ok(_) => BackendError::Malformed("publish returned no links".to_string()),
            Err(e) => e,
        };

        if self.policy.should_retry(attempt) {
            warn!(
                "Publishing file {} failed (attempt {}/{}), retrying in {:?}: {}",
                artifact.backend_file_id,
                attempt,
                self.policy.max_attempts,
                self.policy.delay_before(attempt + 1),
                error
            );
            PublishState::Publishing {
                artifact,
                attempt: attempt + 1,
                waited,
                last: Some(error),
            }
        } else {
            PublishState::Failed(ArtifactError::Exhausted {
                file_id: artifact.backend_file_id,
                attempts: attempt,
                last: error,
            })
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn sleep(&self, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

impl PublishState {
    fn name(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Uploaded(_) => "uploaded",
            Self::Publishing { .. } => "publishing",
            Self::Published(_) => "published",
            Self::Failed(_) => "failed",
        }
    }
}
