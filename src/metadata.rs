use std::collections::BTreeMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SpiderError};
use crate::extractor::{PAGE_STATE_MARKER, decode_embedded_state, embedded_script};

// Selectors for the video page layout
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static DATE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.pudate-text").unwrap());
static TAG_AREA: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ul.tag-area").unwrap());
static TAG_ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.tag").unwrap());
static OVERVIEW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".desc-info-text").unwrap());

/// Human-readable description of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub date: String,
    pub tags: Vec<String>,
    /// Empty when the page has no synopsis.
    pub overview: String,
    /// Part number to part name for multi-part videos.
    pub episodes: BTreeMap<u32, String>,
}

/// Parts of the page the extractor looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Date,
    TagArea,
    Overview,
    Episodes,
}

/// What to do when a field is not on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    /// Use the type's empty value.
    Tolerate,
    Fail(&'static str),
}

impl Field {
    pub fn on_missing(self) -> OnMissing {
        match self {
            Field::Title => OnMissing::Fail("title not found"),
            Field::Date => OnMissing::Fail("publish date not found"),
            Field::TagArea => OnMissing::Fail("tag area not found"),
            Field::Overview => OnMissing::Tolerate,
            // Only an absent marker is tolerated; a broken payload still fails.
            Field::Episodes => OnMissing::Tolerate,
        }
    }
}

fn resolve<T: Default>(field: Field, value: Option<T>) -> Result<T> {
    match (value, field.on_missing()) {
        (Some(value), _) => Ok(value),
        (None, OnMissing::Tolerate) => {
            debug!("{:?} not present, using empty value", field);
            Ok(T::default())
        }
        (None, OnMissing::Fail(reason)) => Err(SpiderError::Structure(reason)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageState {
    video_data: VideoData,
}

#[derive(Debug, Deserialize)]
struct VideoData {
    pages: Vec<PageDescriptor>,
}

#[derive(Debug, Deserialize)]
struct PageDescriptor {
    page: u32,
    part: String,
}

/// Extracts title, date, tags, overview and the episode index from a page.
pub fn extract_metadata(document: &Html) -> Result<VideoMetadata> {
    let title = resolve(
        Field::Title,
        document
            .select(&TITLE)
            .next()
            .map(|h1| h1.text().collect::<String>()),
    )?;

    let date = resolve(
        Field::Date,
        document.select(&DATE).next().map(trimmed_text),
    )?;

    let tags = resolve(
        Field::TagArea,
        document
            .select(&TAG_AREA)
            .next()
            .map(|area| tags_following(document, area)),
    )?;

    let overview = resolve(
        Field::Overview,
        document.select(&OVERVIEW).next().map(trimmed_text),
    )?;

    let episodes = resolve(
        Field::Episodes,
        embedded_script(document, PAGE_STATE_MARKER)
            .map(|script| decode_episodes(&script))
            .transpose()?,
    )?;

    Ok(VideoMetadata {
        title,
        date,
        tags,
        overview,
        episodes,
    })
}

// Some `li.tag` items sit outside `ul.tag-area`, so take every one that
// follows the container in document order.
fn tags_following(document: &Html, area: ElementRef) -> Vec<String> {
    document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .skip_while(|el| el.id() != area.id())
        .skip(1)
        .filter(|el| TAG_ITEM.matches(el))
        .map(trimmed_text)
        .collect()
}

/// Page numbers must be positive and unique.
fn decode_episodes(script: &str) -> Result<BTreeMap<u32, String>> {
    let state: PageState = decode_embedded_state(script, PAGE_STATE_MARKER)?;
    let schema = |detail: String| SpiderError::Schema {
        marker: PAGE_STATE_MARKER,
        detail,
    };

    state
        .video_data
        .pages
        .into_iter()
        .try_fold(BTreeMap::new(), |mut episodes, descriptor| {
            if descriptor.page == 0 {
                return Err(schema("videoData.pages has page number 0".to_string()));
            }
            if episodes.insert(descriptor.page, descriptor.part).is_some() {
                return Err(schema(format!(
                    "videoData.pages repeats page number {}",
                    descriptor.page
                )));
            }
            Ok(episodes)
        })
}

fn trimmed_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}
