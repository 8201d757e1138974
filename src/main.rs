use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod downloader;
mod error;
mod extractor;
mod metadata;
mod ui;
mod utils;

use api::{PageFetcher, RequestHeaders, StreamSource, video_url};
use config::Config;
use downloader::{InfoRecord, merge_streams, retrieve_streams, write_sidecar};
use extractor::{StreamEndpoints, VideoPage, locate_streams};
use metadata::{VideoMetadata, extract_metadata};

const DEFAULT_BVID: &str = "BV19B4y1W76i";

#[derive(Parser)]
#[command(name = "bilispider", version, about = "Fetch metadata and DASH streams of a bilibili video")]
struct Cli {
    /// Video identifier (BV id)
    #[arg(default_value = DEFAULT_BVID)]
    bvid: String,

    /// Directory for the downloaded streams
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Only print the metadata, do not download streams
    #[arg(long)]
    info_only: bool,

    /// Mux video and audio into one file with ffmpeg
    #[arg(long)]
    merge: bool,

    /// Do not write info.json next to the streams
    #[arg(long)]
    no_sidecar: bool,

    /// Config file to use instead of the default one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// What to do once the page is fetched.
#[derive(Debug, Clone)]
struct Options {
    out_dir: PathBuf,
    user_agent: String,
    info_only: bool,
    merge: bool,
    sidecar: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }

    let fetcher = PageFetcher::new(config.timeout(), &config.user_agent)
        .context("Failed to build HTTP client")?;

    let url = video_url(&cli.bvid);
    info!("Fetching {}", url);
    let html = fetcher
        .fetch_text(&url, None)
        .await
        .with_context(|| format!("Failed to fetch video page for {}", cli.bvid))?;

    let page = VideoPage {
        bvid: cli.bvid,
        url,
        html,
    };
    let options = Options {
        out_dir: config.output_dir,
        user_agent: config.user_agent,
        info_only: cli.info_only,
        merge: cli.merge,
        sidecar: !cli.no_sidecar,
    };

    process_page(&fetcher, &page, &options).await?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "bilispider=debug" } else { "bilispider=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs both extractors over the page, then downloads and stores the streams.
async fn process_page<S: StreamSource>(
    source: &S,
    page: &VideoPage,
    options: &Options,
) -> Result<(VideoMetadata, StreamEndpoints)> {
    let (metadata, streams) = extract(page)?;
    ui::print_report(&metadata, &streams);

    if options.info_only {
        return Ok((metadata, streams));
    }

    utils::ensure_directory(&options.out_dir)?;
    let headers = RequestHeaders::with_user_agent(&page.url, &options.user_agent);
    retrieve_streams(source, &streams, &headers, &options.out_dir)
        .await
        .context("Failed to download streams")?;

    if options.sidecar {
        let record = InfoRecord {
            bvid: &page.bvid,
            url: &page.url,
            metadata: &metadata,
            streams: &streams,
        };
        let path = write_sidecar(&options.out_dir, &record).await?;
        info!("Wrote {}", path.display());
    }

    if options.merge {
        match merge_streams(&options.out_dir, &metadata.title)? {
            Some(path) => println!("Merged into {}", path.display()),
            None => warn!("Streams were not merged"),
        }
    }

    Ok((metadata, streams))
}

fn extract(page: &VideoPage) -> Result<(VideoMetadata, StreamEndpoints)> {
    let document = page.document();

    let metadata = extract_metadata(&document)
        .with_context(|| format!("Failed to extract metadata from {}", page.url))?;
    let streams = locate_streams(&document)
        .with_context(|| format!("Failed to locate streams in {}", page.url))?;

    Ok((metadata, streams))
}
