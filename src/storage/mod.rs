//! Remote object-storage backend.
//!
//! The pipeline only talks to [`StorageBackend`] and [`AuthProvider`];
//! [`PCloudClient`] is the production implementation over the pCloud HTTP API.

mod auth;
mod error;
mod models;
mod pcloud;

pub use auth::{AuthProvider, AuthToken, PasswordLogin, StaticToken};
pub use error::{BackendError, ALREADY_EXISTS_CODE};
pub use models::{Container, CreateOutcome, LinkStrategy, PublishedLink, StoredArtifact};
pub use pcloud::PCloudClient;

use async_trait::async_trait;

/// Operations consumed from the remote storage account.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// List top-level containers.
    async fn list_containers(&self, auth: &AuthToken) -> Result<Vec<Container>, BackendError>;

    /// Create a top-level container, reporting whether it already existed.
    async fn create_container(
        &self,
        auth: &AuthToken,
        name: &str,
    ) -> Result<CreateOutcome, BackendError>;

    /// Upload `bytes` as `filename` into the container. Never retried by callers.
    async fn upload_file(
        &self,
        auth: &AuthToken,
        container_id: u64,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoredArtifact, BackendError>;

    /// Make the artifact shareable and return its link(s).
    ///
    /// Which link strategy is used is the backend's business; a failure here
    /// may be transient while the backend propagates the upload.
    async fn publish(
        &self,
        auth: &AuthToken,
        artifact: &StoredArtifact,
    ) -> Result<Vec<PublishedLink>, BackendError>;
}
