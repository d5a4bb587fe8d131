//! HTTP client for the pCloud API.
//!
//! Every pCloud answer is HTTP 200 with a JSON `result` discriminator, so each
//! call checks both the transport status and `result` before decoding.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::models::*;
use super::{AuthToken, BackendError, StorageBackend};

/// Identifier of the account's root folder.
const ROOT_FOLDER_ID: u64 = 0;

/// Client for the pCloud HTTP API.
#[derive(Clone)]
pub struct PCloudClient {
    client: Client,
    base_url: String,
    link_strategy: LinkStrategy,
}

impl PCloudClient {
    /// Create a new PCloudClient.
    ///
    /// # Arguments
    /// * `base_url` - API host (e.g., "https://api.pcloud.com" or "https://eapi.pcloud.com")
    /// * `timeout_secs` - Request timeout in seconds
    /// * `link_strategy` - How published files are turned into links
    pub fn new(base_url: String, timeout_secs: u64, link_strategy: LinkStrategy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            link_strategy,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn link_strategy(&self) -> LinkStrategy {
        self.link_strategy
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Send a request and decode a successful pCloud payload.
    pub(crate) async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Transport(format!(
                "{} failed with status: {}",
                method,
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let status: ApiStatus = decode(&body, method)?;
        if status.result != 0 {
            return Err(BackendError::rejected(
                status.result,
                status.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        decode(&body, method)
    }

    async fn direct_link(
        &self,
        auth: &AuthToken,
        artifact: &StoredArtifact,
    ) -> Result<PublishedLink, BackendError> {
        let request = self
            .client
            .get(self.endpoint("getfilelink"))
            .query(&[("auth", auth.as_str())])
            .query(&[("fileid", artifact.backend_file_id)]);
        let link: FileLinkResponse = self.call("getfilelink", request).await?;
        let host = first_host(link.hosts, "getfilelink")?;

        Ok(PublishedLink::DirectLink {
            host,
            path: link.path,
        })
    }

    async fn code_resolved_link(
        &self,
        auth: &AuthToken,
        artifact: &StoredArtifact,
    ) -> Result<PublishedLink, BackendError> {
        let request = self
            .client
            .get(self.endpoint("getfilepublink"))
            .query(&[("auth", auth.as_str())])
            .query(&[("fileid", artifact.backend_file_id)]);
        let publink: PubLinkResponse = self.call("getfilepublink", request).await?;
        debug!(
            "Obtained public code {} for file {}",
            publink.code, artifact.backend_file_id
        );

        let request = self
            .client
            .get(self.endpoint("getpublinkdownload"))
            .query(&[("code", publink.code.as_str())]);
        let resolved: FileLinkResponse = self.call("getpublinkdownload", request).await?;
        let host = first_host(resolved.hosts, "getpublinkdownload")?;

        Ok(PublishedLink::CodeResolved {
            code: publink.code,
            page_url: publink.link,
            host,
            path: resolved.path,
        })
    }
}

fn first_host(hosts: Vec<String>, method: &str) -> Result<String, BackendError> {
    hosts
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Malformed(format!("{} returned no hosts", method)))
}

fn decode<T: DeserializeOwned>(value: &serde_json::Value, method: &str) -> Result<T, BackendError> {
    T::deserialize(value)
        .map_err(|e| BackendError::Malformed(format!("{} response: {}", method, e)))
}

#[async_trait]
impl StorageBackend for PCloudClient {
    async fn list_containers(&self, auth: &AuthToken) -> Result<Vec<Container>, BackendError> {
        let request = self
            .client
            .get(self.endpoint("listfolder"))
            .query(&[("auth", auth.as_str())])
            .query(&[("folderid", ROOT_FOLDER_ID)]);
        let listing: ListFolderResponse = self.call("listfolder", request).await?;

        Ok(listing
            .metadata
            .contents
            .into_iter()
            .filter(|item| item.isfolder)
            .filter_map(|item| {
                item.folderid.map(|backend_id| Container {
                    name: item.name,
                    backend_id,
                })
            })
            .collect())
    }

    async fn create_container(
        &self,
        auth: &AuthToken,
        name: &str,
    ) -> Result<CreateOutcome, BackendError> {
        let request = self
            .client
            .get(self.endpoint("createfolderifnotexists"))
            .query(&[("auth", auth.as_str()), ("name", name)])
            .query(&[("folderid", ROOT_FOLDER_ID)]);

        match self
            .call::<CreateFolderResponse>("createfolderifnotexists", request)
            .await
        {
            Ok(created) => {
                let backend_id = created.metadata.folderid.ok_or_else(|| {
                    BackendError::Malformed("createfolderifnotexists returned no folderid".into())
                })?;
                Ok(CreateOutcome::Created(Container {
                    name: name.to_string(),
                    backend_id,
                }))
            }
            Err(e) if e.is_already_exists() => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn upload_file(
        &self,
        auth: &AuthToken,
        container_id: u64,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoredArtifact, BackendError> {
        let part = Part::bytes(bytes.to_vec()).file_name(filename.to_string());
        let form = Form::new().part("file", part);
        let request = self
            .client
            .post(self.endpoint("uploadfile"))
            .query(&[("auth", auth.as_str())])
            .query(&[
                ("folderid", container_id),
                ("nopartial", 1),
                ("renameifexists", 1),
            ])
            .multipart(form);

        let uploaded: UploadFileResponse = self.call("uploadfile", request).await?;
        let file = uploaded
            .metadata
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed("uploadfile returned no metadata".into()))?;

        Ok(StoredArtifact {
            backend_file_id: file.fileid,
            filename: if file.name.is_empty() {
                filename.to_string()
            } else {
                file.name
            },
        })
    }

    async fn publish(
        &self,
        auth: &AuthToken,
        artifact: &StoredArtifact,
    ) -> Result<Vec<PublishedLink>, BackendError> {
        let link = match self.link_strategy {
            LinkStrategy::Direct => self.direct_link(auth, artifact).await?,
            LinkStrategy::PublicCode => self.code_resolved_link(auth, artifact).await?,
        };
        Ok(vec![link])
    }
}
