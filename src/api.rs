use std::time::Duration;

use async_trait::async_trait;
use indicatif::ProgressBar;
use reqwest::{Client, Response, header};
use tracing::debug;

use crate::error::{Result, SpiderError};

// Host address and browser identity
pub const VIDEO_BASE: &str = "https://www.bilibili.com/video/";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Canonical page address for a video identifier (e.g. `BV19B4y1W76i`).
pub fn video_url(bvid: &str) -> String {
    format!("{}{}", VIDEO_BASE, bvid)
}

/// Headers the stream CDN checks before serving a segment.
///
/// Requests without the original page as referer are rejected, so every
/// stream fetch must carry one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    pub referer: String,
    pub user_agent: String,
}

impl RequestHeaders {
    pub fn new(referer: &str) -> Self {
        Self::with_user_agent(referer, USER_AGENT)
    }

    pub fn with_user_agent(referer: &str, user_agent: &str) -> Self {
        Self {
            referer: referer.to_string(),
            user_agent: user_agent.to_string(),
        }
    }
}

/// Source of binary stream payloads.
#[async_trait]
pub trait StreamSource: Sync {
    async fn fetch_bytes(
        &self,
        url: &str,
        headers: &RequestHeaders,
        progress: &ProgressBar,
    ) -> Result<Vec<u8>>;
}

/// Thin GET wrapper: one request per call, no retries, any non-2xx is fatal.
///
/// `timeout` bounds connecting and every single read. Page fetches are also
/// bounded as a whole; stream downloads may take as long as bytes keep coming.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self { client, timeout })
    }

    async fn send(
        &self,
        url: &str,
        headers: Option<&RequestHeaders>,
        total: Option<Duration>,
    ) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(total) = total {
            request = request.timeout(total);
        }
        if let Some(headers) = headers {
            request = request
                .header(header::REFERER, headers.referer.as_str())
                .header(header::USER_AGENT, headers.user_agent.as_str());
        }

        debug!("GET {}", url);
        let response = request
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|source| transport_error(url, source))?;

        Ok(response)
    }

    /// Fetches a page and returns its decoded text body.
    pub async fn fetch_text(&self, url: &str, headers: Option<&RequestHeaders>) -> Result<String> {
        let response = self.send(url, headers, Some(self.timeout)).await?;
        response
            .text()
            .await
            .map_err(|source| transport_error(url, source))
    }
}

#[async_trait]
impl StreamSource for PageFetcher {
    async fn fetch_bytes(
        &self,
        url: &str,
        headers: &RequestHeaders,
        progress: &ProgressBar,
    ) -> Result<Vec<u8>> {
        let mut response = self.send(url, Some(headers), None).await?;

        // Content-Length only feeds the progress bar; it is not trusted for allocation.
        if let Some(length) = response.content_length() {
            progress.set_length(length);
        }

        let mut payload = Vec::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| transport_error(url, source))?
        {
            progress.inc(chunk.len() as u64);
            payload.extend_from_slice(&chunk);
        }

        Ok(payload)
    }
}

fn transport_error(url: &str, source: reqwest::Error) -> SpiderError {
    SpiderError::Transport {
        url: url.to_string(),
        source,
    }
}
