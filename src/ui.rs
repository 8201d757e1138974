use std::fmt;

use crate::extractor::StreamEndpoints;
use crate::metadata::VideoMetadata;

/// The summary printed for the operator after extraction.
pub struct Report<'a> {
    pub metadata: &'a VideoMetadata,
    pub streams: &'a StreamEndpoints,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = self.metadata;

        writeln!(f, "Title:    {}", metadata.title)?;
        writeln!(f, "Date:     {}", metadata.date)?;
        if metadata.tags.is_empty() {
            writeln!(f, "Tags:     -")?;
        } else {
            writeln!(f, "Tags:     {}", metadata.tags.join(", "))?;
        }
        if !metadata.overview.is_empty() {
            writeln!(f, "Overview: {}", metadata.overview)?;
        }
        if !metadata.episodes.is_empty() {
            writeln!(f, "Episodes:")?;
            for (page, part) in &metadata.episodes {
                writeln!(f, "  P{:<3} {}", page, part)?;
            }
        }
        writeln!(f, "Video:    {}", self.streams.video_url)?;
        write!(f, "Audio:    {}", self.streams.audio_url)
    }
}

pub fn print_report(metadata: &VideoMetadata, streams: &StreamEndpoints) {
    println!("{}", Report { metadata, streams });
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn report_lists_episodes_in_order() {
        let metadata = VideoMetadata {
            title: "Example Video".to_string(),
            date: "2021-01-01".to_string(),
            tags: vec![],
            overview: String::new(),
            episodes: BTreeMap::from([(2, "Two".to_string()), (1, "One".to_string())]),
        };
        let streams = StreamEndpoints {
            video_url: "https://cdn/v.m4s".to_string(),
            audio_url: "https://cdn/a.m4s".to_string(),
        };

        let report = Report {
            metadata: &metadata,
            streams: &streams,
        }
        .to_string();

        assert!(report.contains("Tags:     -"));
        assert!(!report.contains("Overview"));
        let one = report.find("One").unwrap();
        let two = report.find("Two").unwrap();
        assert!(one < two);
        assert!(report.ends_with("Audio:    https://cdn/a.m4s"));
    }
}
