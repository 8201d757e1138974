use std::path::PathBuf;

/// Failures of the fetch / extract / persist pipeline.
///
/// Nothing here is retried. `Structure`, `Decode` and `Schema` all mean the
/// host changed its page layout under us.
#[derive(Debug, thiserror::Error)]
pub enum SpiderError {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{0}")]
    Structure(&'static str),
    #[error("embedded state `{marker}` is not a valid object")]
    Decode {
        marker: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("embedded state `{marker}` has unexpected shape: {detail}")]
    Schema { marker: &'static str, detail: String },
    #[error("failed to serialize {}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = SpiderError> = std::result::Result<T, E>;
