//! Cover image download.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::debug;

/// Image extensions accepted from a URL path when content sniffing fails.
const KNOWN_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum ThumbnailFetchError {
    #[error("thumbnail request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("thumbnail request to {url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Raw image bytes with a generated filename.
#[derive(Debug, Clone)]
pub struct FetchedThumbnail {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[async_trait]
pub trait ThumbnailFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<FetchedThumbnail, ThumbnailFetchError>;
}

/// Plain HTTP GET, no retry.
#[derive(Clone)]
pub struct HttpThumbnailFetcher {
    client: Client,
}

impl HttpThumbnailFetcher {
    pub fn new(timeout_sec: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ThumbnailFetcher for HttpThumbnailFetcher {
    async fn fetch(&self, locator: &str) -> Result<FetchedThumbnail, ThumbnailFetchError> {
        let request_error = |e: reqwest::Error| ThumbnailFetchError::Request {
            url: locator.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(locator).send().await.map_err(request_error)?;
        if !response.status().is_success() {
            return Err(ThumbnailFetchError::Status {
                url: locator.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(request_error)?.to_vec();
        let filename = format!(
            "{}.{}",
            uuid::Uuid::new_v4(),
            image_extension(&bytes, locator)
        );
        debug!("Fetched {} bytes of thumbnail as {}", bytes.len(), filename);

        Ok(FetchedThumbnail { bytes, filename })
    }
}

/// Pick a file extension: sniffed content first, then the URL path, then jpg.
pub fn image_extension(bytes: &[u8], locator: &str) -> &'static str {
    if let Some(kind) = infer::get(bytes) {
        if kind.mime_type().starts_with("image/") {
            return kind.extension();
        }
    }

    Url::parse(locator)
        .ok()
        .and_then(|url| {
            let path = url.path().to_lowercase();
            let ext = path.rsplit_once('.')?.1.to_string();
            KNOWN_IMAGE_EXTENSIONS.iter().find(|known| **known == ext).copied()
        })
        .unwrap_or(DEFAULT_IMAGE_EXTENSION)
}
