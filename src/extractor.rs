// src/extractor.rs

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{Result, SpiderError};

/// Script carrying page and episode state.
pub const PAGE_STATE_MARKER: &str = "window.__INITIAL_STATE__";
/// Script carrying the DASH player configuration.
pub const PLAYER_STATE_MARKER: &str = "window.__playinfo__";

static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

// `window.__NAME__ = ` at the start of the script
static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(window\.__[A-Za-z_]+__)\s*=\s*").unwrap());

// Only `;` or the end of the script may follow the object
static TERMINATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(;|$)").unwrap());

/// A fetched video page. Both extractors read the same markup.
#[derive(Debug, Clone)]
pub struct VideoPage {
    pub bvid: String,
    pub url: String,
    pub html: String,
}

impl VideoPage {
    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

/// First video and first audio stream of the DASH manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEndpoints {
    pub video_url: String,
    pub audio_url: String,
}

#[derive(Debug, Deserialize)]
struct PlayInfo {
    data: PlayData,
}

#[derive(Debug, Deserialize)]
struct PlayData {
    dash: Dash,
}

#[derive(Debug, Deserialize)]
struct Dash {
    video: Vec<DashStream>,
    audio: Vec<DashStream>,
}

#[derive(Debug, Deserialize)]
struct DashStream {
    #[serde(rename = "baseUrl", alias = "base_url")]
    base_url: String,
}

/// Returns the first element of `selector` accepted by `predicate`.
pub fn find_first_matching<'a, P>(
    document: &'a Html,
    selector: &Selector,
    predicate: P,
) -> Option<ElementRef<'a>>
where
    P: FnMut(&ElementRef<'a>) -> bool,
{
    document.select(selector).find(predicate)
}

/// Text of the script block whose body starts with `marker`, if any.
pub fn embedded_script(document: &Html, marker: &str) -> Option<String> {
    find_first_matching(document, &SCRIPT, |script| {
        script
            .text()
            .next()
            .is_some_and(|text| text.trim_start().starts_with(marker))
    })
    .map(|script| script.text().collect())
}

/// Decodes the object assigned to `marker` in a script body into `T`.
///
/// Invalid JSON is a `Decode` error; valid JSON of the wrong shape is a
/// `Schema` error.
pub fn decode_embedded_state<T: DeserializeOwned>(script: &str, marker: &'static str) -> Result<T> {
    let schema = |detail: String| SpiderError::Schema { marker, detail };

    let captures = ASSIGNMENT
        .captures(script)
        .ok_or_else(|| schema("missing assignment".to_string()))?;
    if &captures[1] != marker {
        return Err(schema(format!("assigned to `{}`", &captures[1])));
    }
    let body = &script[captures.get(0).map_or(0, |m| m.end())..];

    let mut stream = serde_json::Deserializer::from_str(body).into_iter::<Value>();
    let value = stream
        .next()
        .unwrap_or_else(|| serde_json::from_str(body))
        .map_err(|source| SpiderError::Decode { marker, source })?;

    if !value.is_object() {
        return Err(schema("payload is not an object".to_string()));
    }
    if !TERMINATOR.is_match(&body[stream.byte_offset()..]) {
        return Err(schema("trailing content after payload".to_string()));
    }

    debug!("Decoded embedded state {}", marker);
    serde_json::from_value(value).map_err(|e| schema(e.to_string()))
}

/// Finds the first video and audio base URLs in the player state.
pub fn locate_streams(document: &Html) -> Result<StreamEndpoints> {
    let script = embedded_script(document, PLAYER_STATE_MARKER)
        .ok_or(SpiderError::Structure("player state not found"))?;

    let info: PlayInfo = decode_embedded_state(&script, PLAYER_STATE_MARKER)?;
    let dash = info.data.dash;

    Ok(StreamEndpoints {
        video_url: first_base_url(&dash.video, "data.dash.video")?,
        audio_url: first_base_url(&dash.audio, "data.dash.audio")?,
    })
}

// Always index 0, no quality selection
fn first_base_url(streams: &[DashStream], path: &str) -> Result<String> {
    let stream = streams.first().ok_or_else(|| SpiderError::Schema {
        marker: PLAYER_STATE_MARKER,
        detail: format!("{} is empty", path),
    })?;

    Url::parse(&stream.base_url).map_err(|e| SpiderError::Schema {
        marker: PLAYER_STATE_MARKER,
        detail: format!("{}[0].baseUrl is not a valid URL: {}", path, e),
    })?;

    Ok(stream.base_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(scripts: &[&str]) -> Html {
        let body: String = scripts
            .iter()
            .map(|s| format!("<script>{}</script>", s))
            .collect();
        Html::parse_document(&format!("<html><head></head><body>{}</body></html>", body))
    }

    const PLAYINFO: &str = r#"window.__playinfo__={"code":0,"data":{"dash":{"video":[{"id":80,"baseUrl":"https://cdn/v.m4s"},{"id":64,"baseUrl":"https://cdn/v2.m4s"}],"audio":[{"id":30280,"baseUrl":"https://cdn/a.m4s"}]}}}"#;

    #[test]
    fn locates_first_video_and_audio() {
        let doc = page(&["var x = 1;", PLAYINFO]);
        let endpoints = locate_streams(&doc).unwrap();

        assert_eq!(endpoints.video_url, "https://cdn/v.m4s");
        assert_eq!(endpoints.audio_url, "https://cdn/a.m4s");
    }

    #[test]
    fn missing_player_state_is_structure_error() {
        let doc = page(&["window.__INITIAL_STATE__={};"]);
        let err = locate_streams(&doc).unwrap_err();
        assert!(matches!(err, SpiderError::Structure("player state not found")));
    }

    #[test]
    fn empty_video_array_is_schema_error() {
        let doc = page(&[
            r#"window.__playinfo__={"data":{"dash":{"video":[],"audio":[{"baseUrl":"https://cdn/a.m4s"}]}}}"#,
        ]);
        let err = locate_streams(&doc).unwrap_err();
        match err {
            SpiderError::Schema { detail, .. } => assert!(detail.contains("data.dash.video")),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn missing_base_url_is_schema_error() {
        let doc = page(&[
            r#"window.__playinfo__={"data":{"dash":{"video":[{"id":80}],"audio":[{"baseUrl":"https://cdn/a.m4s"}]}}}"#,
        ]);
        assert!(matches!(
            locate_streams(&doc),
            Err(SpiderError::Schema { .. })
        ));
    }

    #[test]
    fn relative_base_url_is_rejected() {
        let doc = page(&[
            r#"window.__playinfo__={"data":{"dash":{"video":[{"baseUrl":"/v.m4s"}],"audio":[{"baseUrl":"https://cdn/a.m4s"}]}}}"#,
        ]);
        assert!(matches!(
            locate_streams(&doc),
            Err(SpiderError::Schema { .. })
        ));
    }

    #[test]
    fn broken_json_is_decode_error() {
        let doc = page(&[r#"window.__playinfo__={"data":{"dash":"#]);
        assert!(matches!(
            locate_streams(&doc),
            Err(SpiderError::Decode { .. })
        ));
    }

    #[test]
    fn decode_stops_at_statement_terminator() {
        let script = r#"window.__INITIAL_STATE__ = {"a":{"b":"};"}};(function(){var s;}());"#;
        let value: Value = decode_embedded_state(script, PAGE_STATE_MARKER).unwrap();
        assert_eq!(value["a"]["b"], "};");
    }

    #[test]
    fn decode_rejects_other_assignment() {
        let script = r#"window.__playinfo__={}"#;
        let err = decode_embedded_state::<Value>(script, PAGE_STATE_MARKER).unwrap_err();
        assert!(matches!(err, SpiderError::Schema { .. }));
    }

    #[test]
    fn decode_rejects_non_object_payload() {
        let script = "window.__INITIAL_STATE__=[1,2];";
        let err = decode_embedded_state::<Value>(script, PAGE_STATE_MARKER).unwrap_err();
        assert!(matches!(err, SpiderError::Schema { .. }));
    }

    #[test]
    fn empty_payload_is_decode_error() {
        let script = "window.__INITIAL_STATE__=   ";
        let err = decode_embedded_state::<Value>(script, PAGE_STATE_MARKER).unwrap_err();
        assert!(matches!(err, SpiderError::Decode { .. }));
    }

    #[test]
    fn find_first_matching_returns_first_hit() {
        let doc = page(&["window.__playinfo__={\"n\":1}", "window.__playinfo__={\"n\":2}"]);
        let script = embedded_script(&doc, PLAYER_STATE_MARKER).unwrap();
        assert!(script.contains("\"n\":1"));
    }
}
