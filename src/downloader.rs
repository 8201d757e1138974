use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, anyhow};
use futures::future::join;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::{RequestHeaders, StreamSource};
use crate::error::{Result, SpiderError};
use crate::extractor::StreamEndpoints;
use crate::metadata::VideoMetadata;
use crate::utils::{is_program_installed, sanitize_file_name};

pub const SIDECAR_NAME: &str = "info.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn file_name(self) -> &'static str {
        match self {
            StreamKind::Video => "video.m4s",
            StreamKind::Audio => "audio.m4s",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// A downloaded stream waiting to be written.
#[derive(Debug)]
pub struct RetrievedStream {
    pub kind: StreamKind,
    pub payload: Vec<u8>,
}

impl RetrievedStream {
    /// Writes the payload to its fixed name in `dir`, replacing any old file.
    pub async fn persist(self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.kind.file_name());
        tokio::fs::write(&path, &self.payload)
            .await
            .map_err(|source| SpiderError::Io {
                path: path.clone(),
                source,
            })?;

        info!("Saved {} stream ({} bytes) to {}", self.kind, self.payload.len(), path.display());
        Ok(path)
    }
}

/// Everything known about a run, written next to the streams.
#[derive(Debug, Serialize)]
pub struct InfoRecord<'a> {
    pub bvid: &'a str,
    pub url: &'a str,
    #[serde(flatten)]
    pub metadata: &'a VideoMetadata,
    pub streams: &'a StreamEndpoints,
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:>5} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec})")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

async fn fetch_stream<S: StreamSource>(
    source: &S,
    kind: StreamKind,
    url: &str,
    headers: &RequestHeaders,
    bars: &MultiProgress,
) -> Result<RetrievedStream> {
    let bar = bars.add(ProgressBar::new(0));
    bar.set_style(progress_style());
    bar.set_message(kind.to_string());

    info!("Downloading {} stream from {}", kind, url);
    let payload = source.fetch_bytes(url, headers, &bar).await;
    bar.finish();

    Ok(RetrievedStream {
        kind,
        payload: payload?,
    })
}

/// Downloads both streams concurrently and writes them into `out_dir`.
///
/// Nothing is written unless both downloads succeed. When both fail the video
/// error is returned and the audio one is logged.
pub async fn retrieve_streams<S: StreamSource>(
    source: &S,
    endpoints: &StreamEndpoints,
    headers: &RequestHeaders,
    out_dir: &Path,
) -> Result<[PathBuf; 2]> {
    let bars = MultiProgress::new();

    let (video, audio) = join(
        fetch_stream(source, StreamKind::Video, &endpoints.video_url, headers, &bars),
        fetch_stream(source, StreamKind::Audio, &endpoints.audio_url, headers, &bars),
    )
    .await;

    let (video, audio) = match (video, audio) {
        (Ok(video), Ok(audio)) => (video, audio),
        (Err(video_err), Err(audio_err)) => {
            error!("Audio stream failed as well: {}", audio_err);
            return Err(video_err);
        }
        (Err(err), Ok(_)) | (Ok(_), Err(err)) => return Err(err),
    };

    Ok([video.persist(out_dir).await?, audio.persist(out_dir).await?])
}

/// Writes the metadata record as pretty JSON.
pub async fn write_sidecar(out_dir: &Path, record: &InfoRecord<'_>) -> Result<PathBuf> {
    let path = out_dir.join(SIDECAR_NAME);
    let json = serde_json::to_vec_pretty(record).map_err(|source| SpiderError::Serialize {
        path: path.clone(),
        source,
    })?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|source| SpiderError::Io {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}

/// Muxes the two streams into `<title>.mp4` with ffmpeg.
///
/// Returns `None` when ffmpeg is not installed.
pub fn merge_streams(out_dir: &Path, title: &str) -> anyhow::Result<Option<PathBuf>> {
    if !is_program_installed("ffmpeg") {
        warn!("ffmpeg not found, leaving video and audio streams separate");
        return Ok(None);
    }

    let output = out_dir.join(format!("{}.mp4", sanitize_file_name(title)));
    info!("Merging streams into {}", output.display());

    let status = Command::new("ffmpeg")
        .args(["-y", "-loglevel", "warning", "-i"])
        .arg(out_dir.join(StreamKind::Video.file_name()))
        .arg("-i")
        .arg(out_dir.join(StreamKind::Audio.file_name()))
        .args(["-c", "copy"])
        .arg(&output)
        .status()
        .context("Failed to start ffmpeg")?;

    if !status.success() {
        return Err(anyhow!("ffmpeg exited with {}", status));
    }

    Ok(Some(output))
}
