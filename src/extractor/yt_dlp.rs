//! Media extraction using the yt-dlp command line tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExtractionError, MediaExtractor, RawExtraction};

/// Subset of the info JSON printed by `--dump-json`.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

/// Runs yt-dlp to download the best audio stream and convert it.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    work_dir: PathBuf,
    audio_format: String,
    audio_quality: String,
}

impl YtDlpExtractor {
    /// # Arguments
    /// * `binary` - Path or name of the yt-dlp executable
    /// * `work_dir` - Parent directory for per-invocation scratch directories
    /// * `audio_format` - Target codec for `--audio-format` (e.g., "mp3")
    /// * `audio_quality` - Target bitrate in kbps for `--audio-quality` (e.g., "192")
    pub fn new(
        binary: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        audio_format: impl Into<String>,
        audio_quality: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            audio_format: audio_format.into(),
            audio_quality: audio_quality.into(),
        }
    }

    fn command(
        &self,
        source_uri: &str,
        output_template: &Path,
        cookie_file: Option<&Path>,
    ) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-f", "bestaudio/best", "-x"])
            .arg("--audio-format")
            .arg(&self.audio_format)
            .arg("--audio-quality")
            .arg(format!("{}K", self.audio_quality))
            .args(["--no-playlist", "--no-progress", "--dump-json", "--no-simulate"])
            .arg("-o")
            .arg(output_template);
        if let Some(cookies) = cookie_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg("--").arg(source_uri);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Locate the converted audio file, tolerating an unexpected extension.
    async fn find_output(&self, dir: &Path, stem: &str) -> Result<PathBuf, ExtractionError> {
        let expected = dir.join(format!("{}.{}", stem, self.audio_format));
        if tokio::fs::try_exists(&expected).await? {
            return Ok(expected);
        }

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(stem) {
                warn!(
                    "Expected {:?} but yt-dlp produced {:?}",
                    expected,
                    entry.path()
                );
                return Ok(entry.path());
            }
        }

        Err(ExtractionError::NoAudio(
            "yt-dlp finished without producing an audio file".to_string(),
        ))
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(
        &self,
        source_uri: &str,
        cookie_file: Option<&Path>,
    ) -> Result<RawExtraction, ExtractionError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        // Removed on every exit path when dropped.
        let scratch = tempfile::Builder::new()
            .prefix("tubevault-extract-")
            .tempdir_in(&self.work_dir)?;

        let stem = uuid::Uuid::new_v4().to_string();
        let template = scratch.path().join(format!("{}.%(ext)s", stem));

        debug!("Running {:?} for {}", self.binary, source_uri);
        let output = self
            .command(source_uri, &template, cookie_file)
            .output()
            .await
            .map_err(|e| {
                ExtractionError::Failed(format!("could not run {:?}: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let info = parse_info(&String::from_utf8_lossy(&output.stdout))?;
        let audio_path = self.find_output(scratch.path(), &stem).await?;
        let audio = tokio::fs::read(&audio_path).await?;

        Ok(RawExtraction {
            audio,
            title: info.title,
            thumbnail_url: info.thumbnail,
        })
    }
}

/// Take the last JSON object printed on stdout.
fn parse_info(stdout: &str) -> Result<VideoInfo, ExtractionError> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<VideoInfo>(line).ok())
        .ok_or_else(|| ExtractionError::Failed("yt-dlp printed no video info".to_string()))
}

/// Map yt-dlp's stderr to an extraction error kind.
fn classify_failure(stderr: &str) -> ExtractionError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .unwrap_or(stderr)
        .trim()
        .to_string();
    let lower = stderr.to_lowercase();

    if lower.contains("sign in")
        || lower.contains("cookies")
        || lower.contains("login required")
        || lower.contains("private video")
    {
        ExtractionError::CredentialsRejected(message)
    } else if lower.contains("unable to download webpage")
        || lower.contains("failed to resolve")
        || lower.contains("name or service not known")
        || lower.contains("http error 404")
        || lower.contains("is not a valid url")
    {
        ExtractionError::Unreachable(message)
    } else if lower.contains("requested format is not available") || lower.contains("no audio") {
        ExtractionError::NoAudio(message)
    } else {
        ExtractionError::Failed(message)
    }
}
