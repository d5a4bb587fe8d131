//! Request-level error taxonomy.

use thiserror::Error;

use crate::extractor::ExtractionError;
use crate::namespace::NamespaceError;
use crate::publisher::ArtifactError;
use crate::storage::BackendError;
use crate::thumbnail::ThumbnailFetchError;

/// Every way a single pipeline run can fail. All variants are terminal for
/// the request that produced them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage authentication failed: {0}")]
    Authentication(#[source] BackendError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    ThumbnailFetch(#[from] ThumbnailFetchError),

    #[error("No thumbnail found.")]
    MissingThumbnail,

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error("upload of {filename:?} failed: {source}")]
    Upload {
        filename: String,
        #[source]
        source: BackendError,
    },

    #[error("{}", publish_message(.file_id, .attempts, .last, .cancelled))]
    Publish {
        file_id: u64,
        attempts: u32,
        last: Option<BackendError>,
        cancelled: bool,
    },

    #[error("temporary resource error: {0}")]
    TempResource(#[source] std::io::Error),
}

impl PipelineError {
    /// Stable label used in logs, metrics and error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::Extraction(_) => "extraction",
            Self::ThumbnailFetch(_) => "thumbnail_fetch",
            Self::MissingThumbnail => "missing_thumbnail",
            Self::Namespace(_) => "namespace",
            Self::Upload { .. } => "upload",
            Self::Publish { .. } => "publish",
            Self::TempResource(_) => "temp_resource",
        }
    }
}

impl From<ArtifactError> for PipelineError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Upload { filename, source } => Self::Upload { filename, source },
            ArtifactError::Exhausted {
                file_id,
                attempts,
                last,
            } => Self::Publish {
                file_id,
                attempts,
                last: Some(last),
                cancelled: false,
            },
            ArtifactError::Cancelled {
                file_id,
                attempts,
                last,
            } => Self::Publish {
                file_id,
                attempts,
                last,
                cancelled: true,
            },
        }
    }
}

fn publish_message(
    file_id: &u64,
    attempts: &u32,
    last: &Option<BackendError>,
    cancelled: &bool,
) -> String {
    let mut message = if *cancelled {
        format!(
            "publishing file {} cancelled after {} attempt(s)",
            file_id, attempts
        )
    } else {
        format!(
            "publishing file {} failed after {} attempt(s)",
            file_id, attempts
        )
    };
    if let Some(last) = last {
        message.push_str(&format!(", last error: {}", last));
    }
    message
}
