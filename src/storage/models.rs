//! Backend-agnostic storage models plus the pCloud wire types.

use serde::{Deserialize, Serialize};

// =============================================================================
// Domain types
// =============================================================================

/// A named top-level grouping on the backend (a pCloud folder).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub backend_id: u64,
}

/// Result of a create-container call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The backend returned the container's identity (new or pre-existing).
    Created(Container),
    /// The backend reported the name as taken without returning an identifier.
    AlreadyExists,
}

/// Reference to an uploaded object. The backend owns the object itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredArtifact {
    pub backend_file_id: u64,
    pub filename: String,
}

/// How a backend turns an uploaded file into a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum LinkStrategy {
    /// One call returning a ready-to-use host + path.
    #[default]
    Direct,
    /// Obtain a public share code, then resolve the code to a host + path.
    PublicCode,
}

/// A link representation returned by a successful publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishedLink {
    DirectLink {
        host: String,
        path: String,
    },
    CodeResolved {
        code: String,
        /// Public page for the code, when the backend reported one.
        page_url: Option<String>,
        host: String,
        path: String,
    },
}

// =============================================================================
// pCloud wire types
// =============================================================================

/// Every pCloud response carries `result` (0 on success) and `error` otherwise.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiStatus {
    pub result: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FolderMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub isfolder: bool,
    #[serde(default)]
    pub folderid: Option<u64>,
    #[serde(default)]
    pub contents: Vec<FolderMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListFolderResponse {
    pub metadata: FolderMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateFolderResponse {
    pub metadata: FolderMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileMetadata {
    pub fileid: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadFileResponse {
    #[serde(default)]
    pub metadata: Vec<FileMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileLinkResponse {
    #[serde(default)]
    pub hosts: Vec<String>,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PubLinkResponse {
    pub code: String,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub auth: String,
}
