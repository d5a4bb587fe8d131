//! Get-or-create resolution of named containers.
//!
//! The backend is the source of truth: nothing is cached between calls, and a
//! create that reports "already exists" is treated as success and followed by
//! a fresh listing.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::{AuthToken, BackendError, CreateOutcome, StorageBackend};

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("could not resolve container {name:?}: listing failed ({list}), creation failed ({create})")]
    Unresolvable {
        name: String,
        list: BackendError,
        create: BackendError,
    },

    #[error("container {name:?} reported as existing but not found in listing: {detail}")]
    Vanished { name: String, detail: String },

    #[error("creating container {name:?} failed: {create}")]
    CreateRejected { name: String, create: BackendError },
}

/// Maps logical container names to backend identifiers.
#[derive(Clone)]
pub struct NamespaceResolver {
    backend: Arc<dyn StorageBackend>,
}

impl NamespaceResolver {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Return the identifier of the top-level container named exactly `name`,
    /// creating it when absent.
    pub async fn resolve(&self, auth: &AuthToken, name: &str) -> Result<u64, NamespaceError> {
        let list_error = match self.find(auth, name).await {
            Ok(Some(id)) => {
                debug!("Container {:?} found with id {}", name, id);
                return Ok(id);
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Listing containers failed, attempting creation of {:?}: {}", name, e);
                Some(e)
            }
        };

        match self.backend.create_container(auth, name).await {
            Ok(CreateOutcome::Created(container)) => {
                info!("Container {:?} ready with id {}", name, container.backend_id);
                Ok(container.backend_id)
            }
            Ok(CreateOutcome::AlreadyExists) => {
                debug!("Container {:?} created concurrently, re-listing", name);
                match self.find(auth, name).await {
                    Ok(Some(id)) => Ok(id),
                    Ok(None) => Err(NamespaceError::Vanished {
                        name: name.to_string(),
                        detail: "absent from listing".to_string(),
                    }),
                    Err(e) => Err(NamespaceError::Vanished {
                        name: name.to_string(),
                        detail: e.to_string(),
                    }),
                }
            }
            Err(create) => match list_error {
                Some(list) => Err(NamespaceError::Unresolvable {
                    name: name.to_string(),
                    list,
                    create,
                }),
                // The listing worked, so an unexpected create failure is retried
                // through one more listing before giving up.
                None => match self.find(auth, name).await {
                    Ok(Some(id)) => Ok(id),
                    Ok(None) => Err(NamespaceError::CreateRejected {
                        name: name.to_string(),
                        create,
                    }),
                    Err(list) => Err(NamespaceError::Unresolvable {
                        name: name.to_string(),
                        list,
                        create,
                    }),
                },
            },
        }
    }

    async fn find(&self, auth: &AuthToken, name: &str) -> Result<Option<u64>, BackendError> {
        let containers = self.backend.list_containers(auth).await?;
        Ok(containers
            .into_iter()
            .find(|container| container.name == name)
            .map(|container| container.backend_id))
    }
}
