use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tubevault::config::{AppConfig, CliConfig, CredentialSource, EnvSecrets, FileConfig};
use tubevault::extractor::YtDlpExtractor;
use tubevault::pipeline::{PipelineCollaborators, PipelineCredentials, PipelineOrchestrator};
use tubevault::publisher::PublishRetryPolicy;
use tubevault::server::{self, run_server, RequestsLoggingLevel, ServerConfig};
use tubevault::storage::{AuthProvider, PCloudClient, PasswordLogin, StaticToken};
use tubevault::temp_resources::TempResources;
use tubevault::thumbnail::HttpThumbnailFetcher;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the pCloud API (use https://eapi.pcloud.com for EU accounts).
    #[clap(long, default_value = tubevault::config::DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Timeout in seconds for outbound HTTP requests.
    #[clap(long, default_value_t = 300)]
    pub request_timeout_sec: u64,

    /// Path or name of the yt-dlp executable.
    #[clap(long, default_value = "yt-dlp")]
    pub yt_dlp_path: String,

    /// Directory for transient files. Defaults to the system temp directory.
    #[clap(long, value_parser = parse_path)]
    pub work_dir: Option<PathBuf>,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            api_base_url: args.api_base_url.clone(),
            request_timeout_sec: args.request_timeout_sec,
            yt_dlp_path: args.yt_dlp_path.clone(),
            work_dir: args.work_dir.clone(),
        }
    }
}

fn make_auth_provider(
    source: Option<CredentialSource>,
    client: &PCloudClient,
) -> Option<Arc<dyn AuthProvider>> {
    match source {
        Some(CredentialSource::Token(token)) => {
            info!("Using static pCloud auth token");
            Some(Arc::new(StaticToken::new(token)))
        }
        Some(CredentialSource::Login { username, password }) => {
            info!("Using pCloud login for {}", username);
            Some(Arc::new(PasswordLogin::new(
                client.clone(),
                username,
                password,
            )))
        }
        None => {
            warn!(
                "No pCloud credentials set; uploads will fail until PCLOUD_AUTH \
                 or PCLOUD_USERNAME/PCLOUD_PASSWORD is provided"
            );
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(
        &CliConfig::from(&cli_args),
        file_config,
        EnvSecrets::from_env(),
    )?;
    info!("Resolved configuration: {:?}", app_config);

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let backend = PCloudClient::new(
        app_config.api_base_url.clone(),
        app_config.request_timeout_sec,
        app_config.publish.link_strategy,
    )?;
    let auth = make_auth_provider(app_config.secrets.credential_source(), &backend);
    if app_config.secrets.youtube_cookies.is_none() {
        warn!("YOUTUBE_COOKIES is not set; uploads will fail until it is provided");
    }

    let extractor = YtDlpExtractor::new(
        &app_config.yt_dlp_path,
        &app_config.work_dir,
        &app_config.pipeline.audio_format,
        &app_config.pipeline.audio_quality,
    );
    let thumbnails = HttpThumbnailFetcher::new(app_config.request_timeout_sec)?;

    let shutdown_token = CancellationToken::new();
    let pipeline = PipelineOrchestrator::new(
        app_config.pipeline.clone(),
        PublishRetryPolicy::new(&app_config.publish),
        PipelineCredentials {
            auth,
            cookies: app_config.secrets.youtube_cookies.clone(),
        },
        PipelineCollaborators {
            extractor: Arc::new(extractor),
            thumbnails: Arc::new(thumbnails),
            backend: Arc::new(backend),
        },
        TempResources::new(&app_config.work_dir),
        shutdown_token.clone(),
    );

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    let serving = run_server(server_config, Arc::new(pipeline), shutdown_token.clone());
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            serving.await
        }
    }
}
