//! yt-dlp as an external acquisition tool.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{ProcessError, probe_version, run_to_exit, tokio_command};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::cleanup_staged;
use crate::acquisition::{
    AcquisitionRequest, AcquisitionStrategy, MediaFormat, MediaInfo, Quality, StrategyContext,
    StrategyOutput,
};
use crate::{Error, Result};

pub const YTDLP_NAME: &str = "yt-dlp";

const MIN_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Subset of yt-dlp's `--dump-json` output.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl From<YtDlpInfo> for MediaInfo {
    fn from(raw: YtDlpInfo) -> Self {
        let mut info = MediaInfo::default();
        if let Some(title) = raw.title.filter(|t| !t.is_empty()) {
            info.title = title;
        }
        if let Some(thumbnail) = raw.thumbnail {
            info.thumbnail = thumbnail;
        }
        if let Some(duration) = raw.duration.filter(|d| d.is_finite() && *d > 0.0) {
            info.duration_secs = duration.round() as u64;
        }
        info
    }
}

/// Runs yt-dlp to download and transcode the source.
pub struct YtDlpStrategy {
    binary: String,
    version: OnceCell<Option<String>>,
}

impl YtDlpStrategy {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            version: OnceCell::new(),
        }
    }

    /// Argument vector for one invocation. The URL always follows `--` so it
    /// can never be read as an option.
    ///
    /// `budget` is the attempt's time limit; a quarter of it, within 5-30 s,
    /// becomes the per-socket timeout so a stalled connection fails the
    /// attempt early instead of eating the whole budget.
    pub fn build_args(
        request: &AcquisitionRequest,
        output_template: &Path,
        budget: Duration,
    ) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-playlist",
            "--no-progress",
            "--no-warnings",
            "--no-simulate",
            "--dump-json",
            "--no-part",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let socket_timeout = (budget / 4).clamp(MIN_SOCKET_TIMEOUT, MAX_SOCKET_TIMEOUT);
        args.push("--socket-timeout".to_string());
        args.push(socket_timeout.as_secs().to_string());

        args.push("-o".to_string());
        args.push(output_template.to_string_lossy().into_owned());

        match (request.format, request.quality) {
            (MediaFormat::Audio, quality) => {
                args.extend(
                    ["-f", "bestaudio/best", "-x", "--audio-format", "mp3"]
                        .map(String::from),
                );
                args.push("--audio-quality".to_string());
                args.push(format!("{}K", quality.value()));
            }
            (MediaFormat::Video, quality) => {
                let height = match quality {
                    Quality::VideoHeight(h) => h,
                    Quality::AudioKbps(_) => 720,
                };
                args.push("-f".to_string());
                args.push(format!(
                    "bestvideo[height<={height}]+bestaudio/best[height<={height}]/best"
                ));
                // A single-file `/best` pick is not merged, so remux it too.
                args.extend(
                    ["--merge-output-format", "mp4", "--remux-video", "mp4"].map(String::from),
                );
            }
        }

        if request.aggressive {
            args.extend(
                [
                    "--extractor-retries",
                    "3",
                    "--retries",
                    "10",
                    "--fragment-retries",
                    "10",
                    "--force-ipv4",
                ]
                .map(String::from),
            );
        }

        args.push("--".to_string());
        args.push(request.source_url.to_string());
        args
    }

    /// The last JSON object printed on stdout.
    fn parse_info(stdout: &str) -> Option<MediaInfo> {
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|l| l.starts_with('{'))
            .find_map(|l| serde_json::from_str::<YtDlpInfo>(l).ok())
            .map(MediaInfo::from)
    }

    async fn run(&self, ctx: &StrategyContext, request: &AcquisitionRequest) -> Result<StrategyOutput> {
        let template = ctx.target.dir.join(format!("{}.%(ext)s", ctx.target.id));
        let mut cmd = tokio_command(&self.binary);
        cmd.args(Self::build_args(request, &template, ctx.timeout));

        debug!(artifact_id = %ctx.target.id, url = %request.source_url, "Running yt-dlp");
        let output = run_to_exit(cmd, &ctx.cancel).await.map_err(|e| match e {
            ProcessError::Cancelled { .. } => Error::strategy(YTDLP_NAME, "cancelled"),
            other => Error::strategy(YTDLP_NAME, other.to_string()),
        })?;

        if !output.success() {
            let code = output
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(Error::strategy(
                YTDLP_NAME,
                format!("exited with {code}: {}", output.stderr_summary()),
            ));
        }

        if !tokio::fs::try_exists(&ctx.target.path).await.unwrap_or(false) {
            return Err(Error::strategy(
                YTDLP_NAME,
                format!("expected output {} was not written", ctx.target.path.display()),
            ));
        }

        let mut result = StrategyOutput::new(ctx.target.path.clone());
        if let Some(info) = Self::parse_info(&output.stdout) {
            result = result.with_info(info);
        }
        Ok(result)
    }
}

#[async_trait]
impl AcquisitionStrategy for YtDlpStrategy {
    fn name(&self) -> &str {
        YTDLP_NAME
    }

    async fn is_available(&self) -> bool {
        let version = self
            .version
            .get_or_init(|| async {
                let version = probe_version(&self.binary).await;
                match &version {
                    Some(v) => info!(binary = %self.binary, version = %v, "yt-dlp available"),
                    None => warn!(binary = %self.binary, "yt-dlp not found, strategy disabled"),
                }
                version
            })
            .await;
        version.is_some()
    }

    async fn attempt(
        &self,
        ctx: &StrategyContext,
        request: &AcquisitionRequest,
    ) -> Result<StrategyOutput> {
        let result = self.run(ctx, request).await;
        match &result {
            // Drop intermediates such as the pre-transcode download.
            Ok(output) => cleanup_staged(&ctx.target, Some(&output.path)).await,
            Err(_) => cleanup_staged(&ctx.target, None).await,
        }
        result
    }
}
