//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server wired to its own fake pCloud API and
//! work directory. Only media extraction is scripted; the storage client,
//! thumbnail fetcher and router are the real ones.

use super::constants::*;
use super::fake_pcloud::FakePCloud;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tubevault::config::PipelineSettings;
use tubevault::extractor::{ExtractionError, MediaExtractor, RawExtraction};
use tubevault::pipeline::{
    MissingThumbnailPolicy, PipelineCollaborators, PipelineCredentials, PipelineOrchestrator,
};
use tubevault::publisher::PublishRetryPolicy;
use tubevault::server::{make_app, ServerConfig};
use tubevault::storage::{AuthProvider, LinkStrategy, PCloudClient, PasswordLogin, StaticToken};
use tubevault::temp_resources::{TempResourceStats, TempResources};
use tubevault::thumbnail::HttpThumbnailFetcher;
use tubevault::RequestsLoggingLevel;

/// Where the scripted extractor points the thumbnail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThumbnailSource {
    /// The image hosted by the fake API
    Served,
    /// A URL on the fake host that answers 404
    Broken,
    /// The extractor reports no thumbnail at all
    Absent,
}

/// How the pipeline authenticates against the fake API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Credentials {
    Token,
    Login,
    BadLogin,
    Missing,
}

#[derive(Clone, Debug)]
pub struct TestServerOptions {
    pub missing_thumbnail: MissingThumbnailPolicy,
    pub link_strategy: LinkStrategy,
    pub thumbnail: ThumbnailSource,
    pub credentials: Credentials,
    pub cookies: Option<&'static str>,
    pub title: Option<&'static str>,
    pub max_attempts: u32,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            missing_thumbnail: MissingThumbnailPolicy::Fail,
            link_strategy: LinkStrategy::Direct,
            thumbnail: ThumbnailSource::Served,
            credentials: Credentials::Token,
            cookies: Some(TEST_COOKIES_B64),
            title: Some(VIDEO_TITLE),
            max_attempts: 3,
        }
    }
}

/// Extractor returning canned media instead of running yt-dlp
pub struct ScriptedExtractor {
    raw: RawExtraction,
    pub calls: AtomicU32,
}

#[async_trait]
impl MediaExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _source_uri: &str,
        cookie_file: Option<&Path>,
    ) -> Result<RawExtraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let cookie_file = cookie_file.expect("Pipeline did not pass a cookie file");
        let cookies = std::fs::read_to_string(cookie_file).expect("Cookie file not readable");
        assert!(cookies.starts_with("# Netscape HTTP Cookie File"));
        Ok(self.raw.clone())
    }
}

/// Test server instance with its own fake pCloud
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// The fake storage backend, for inspecting uploads and injecting failures
    pub pcloud: FakePCloud,

    pub extractor: Arc<ScriptedExtractor>,

    pipeline: Arc<PipelineOrchestrator>,

    // Private fields - keep resources alive until drop
    _work_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a server with default options on a random port
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Starts a fake pCloud API on its own random port
    /// 2. Builds the pipeline against it with near-zero retry delays
    /// 3. Binds to a random port (127.0.0.1:0)
    /// 4. Spawns the server in a background task
    /// 5. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of the above fails or the server doesn't become ready
    /// within the timeout.
    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let pcloud = FakePCloud::spawn().await;
        let work_dir = TempDir::new().expect("Failed to create work dir");

        let client = PCloudClient::new(pcloud.base_url.clone(), 5, options.link_strategy)
            .expect("Failed to build pCloud client");
        let auth: Option<Arc<dyn AuthProvider>> = match options.credentials {
            Credentials::Token => Some(Arc::new(StaticToken::new(TEST_AUTH_TOKEN))),
            Credentials::Login => Some(Arc::new(PasswordLogin::new(
                client.clone(),
                TEST_USERNAME.to_string(),
                TEST_PASSWORD.to_string(),
            ))),
            Credentials::BadLogin => Some(Arc::new(PasswordLogin::new(
                client.clone(),
                TEST_USERNAME.to_string(),
                "wrong".to_string(),
            ))),
            Credentials::Missing => None,
        };

        let thumbnail_url = match options.thumbnail {
            ThumbnailSource::Served => Some(pcloud.thumbnail_url()),
            ThumbnailSource::Broken => Some(pcloud.missing_thumbnail_url()),
            ThumbnailSource::Absent => None,
        };
        let extractor = Arc::new(ScriptedExtractor {
            raw: RawExtraction {
                audio: FAKE_AUDIO.to_vec(),
                title: options.title.map(str::to_string),
                thumbnail_url,
            },
            calls: AtomicU32::new(0),
        });

        let pipeline = Arc::new(PipelineOrchestrator::new(
            PipelineSettings {
                missing_thumbnail: options.missing_thumbnail,
                ..Default::default()
            },
            PublishRetryPolicy {
                max_attempts: options.max_attempts,
                initial_delay: Duration::from_millis(5),
                delay_increment: Duration::from_millis(5),
            },
            PipelineCredentials {
                auth,
                cookies: options.cookies.map(str::to_string),
            },
            PipelineCollaborators {
                extractor: extractor.clone(),
                thumbnails: Arc::new(
                    HttpThumbnailFetcher::new(5).expect("Failed to build thumbnail fetcher"),
                ),
                backend: Arc::new(client),
            },
            TempResources::new(work_dir.path()),
            CancellationToken::new(),
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        let app = make_app(config, pipeline.clone());

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            pcloud,
            extractor,
            pipeline,
            _work_dir: work_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Acquire/release counters of the pipeline's temp resources
    pub fn resource_stats(&self) -> TempResourceStats {
        self.pipeline.resource_stats()
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
