// Video transcripts from YouTube's timedtext endpoint.
//
// Two requests per video: the caption track list, then the chosen track in
// json3 format. The preferred language wins, then English, then whatever
// track the video has. A video with no tracks has no transcript.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use insightgraph_common::ContentItem;

use super::HttpSource;

pub const DEFAULT_LANGUAGE: &str = "en";

const TIMEDTEXT_URL: &str = "https://www.youtube.com/api/timedtext";

static TRACK_LANG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<track\b[^>]*\blang_code="([^"]+)""#).expect("Invalid track regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    /// Seconds from the start of the video.
    pub start: f64,
    pub duration: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub language: String,
    /// The preferred language had no track and another one was used.
    pub fallback_language: bool,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// End of the last segment, in seconds.
    pub fn duration(&self) -> f64 {
        self.segments
            .last()
            .map(|s| s.start + s.duration)
            .unwrap_or(0.0)
    }

    /// Replace the item's body with the transcript text. The feed
    /// description is kept under the `description` metadata key.
    pub fn attach_to(&self, item: ContentItem) -> ContentItem {
        let description = item.body.clone();
        let mut item = ContentItem {
            body: self.full_text(),
            ..item
        };
        if !description.is_empty() {
            item = item.with_metadata("description", description);
        }
        item.with_metadata("has_transcript", true)
            .with_metadata("transcript_language", self.language.clone())
            .with_metadata("transcript_segments", self.segments.len() as i64)
            .with_metadata("duration_secs", self.duration())
            .with_metadata("fallback_language", self.fallback_language)
    }
}

#[derive(Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs", default)]
    start_ms: u64,
    #[serde(rename = "dDurationMs", default)]
    duration_ms: u64,
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Language codes listed in a `type=list` timedtext response, in listed order.
pub fn parse_track_list(body: &[u8]) -> Vec<String> {
    let body = String::from_utf8_lossy(body);
    TRACK_LANG
        .captures_iter(&body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Pick a track: `preferred` (or a regional variant of it), then English,
/// then the first listed. The flag is true when `preferred` was not found.
pub fn choose_language(available: &[String], preferred: &str) -> Option<(String, bool)> {
    let find = |lang: &str| {
        available
            .iter()
            .find(|code| {
                code.as_str() == lang
                    || code
                        .strip_prefix(lang)
                        .is_some_and(|rest| rest.starts_with('-'))
            })
            .cloned()
    };
    if let Some(code) = find(preferred) {
        return Some((code, false));
    }
    find(DEFAULT_LANGUAGE)
        .or_else(|| available.first().cloned())
        .map(|code| (code, true))
}

/// Parse a json3 caption track. An empty body means no captions.
pub fn parse_json3(body: &[u8]) -> Result<Vec<TranscriptSegment>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let track: Json3 = serde_json::from_slice(body).context("Failed to parse json3 captions")?;
    Ok(track
        .events
        .into_iter()
        .filter_map(|event| {
            let text = event
                .segs
                .iter()
                .map(|s| s.utf8.as_str())
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            (!text.is_empty()).then(|| TranscriptSegment {
                start: event.start_ms as f64 / 1000.0,
                duration: event.duration_ms as f64 / 1000.0,
                text,
            })
        })
        .collect())
}

pub fn track_list_url(video_id: &str) -> Result<String> {
    Ok(url::Url::parse_with_params(TIMEDTEXT_URL, [("type", "list"), ("v", video_id)])?.into())
}

pub fn track_url(video_id: &str, language: &str) -> Result<String> {
    Ok(url::Url::parse_with_params(
        TIMEDTEXT_URL,
        [("v", video_id), ("lang", language), ("fmt", "json3")],
    )?
    .into())
}

/// Fetch the transcript for one video. `Ok(None)` when it has no captions.
pub async fn fetch_transcript(
    http: &HttpSource,
    video_id: &str,
    preferred: &str,
) -> Result<Option<Transcript>> {
    let list = http.get_bytes(&track_list_url(video_id)?).await?;
    let available = parse_track_list(&list);
    let Some((language, fallback_language)) = choose_language(&available, preferred) else {
        return Ok(None);
    };
    let body = http.get_bytes(&track_url(video_id, &language)?).await?;
    let segments = parse_json3(&body)?;
    if segments.is_empty() {
        return Ok(None);
    }
    Ok(Some(Transcript {
        language,
        fallback_language,
        segments,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use insightgraph_common::MetadataValue;

    const TRACK_LIST: &str = r#"<?xml version="1.0" encoding="utf-8" ?><transcript_list docid="123">
<track id="0" name="" lang_code="de" lang_original="Deutsch" lang_translated="German"/>
<track id="1" name="" lang_code="en-GB" lang_original="English (United Kingdom)" lang_translated="English (United Kingdom)" lang_default="true"/>
</transcript_list>"#;

    const JSON3: &str = r#"{
        "wireMagic": "pb3",
        "events": [
            {"tStartMs": 0, "dDurationMs": 64000, "id": 1, "wpWinPosId": 1},
            {"tStartMs": 1200, "dDurationMs": 3400, "segs": [{"utf8": "Mistral just"}, {"utf8": " released"}]},
            {"tStartMs": 4600, "dDurationMs": 2000, "segs": [{"utf8": "\n"}]},
            {"tStartMs": 6600, "dDurationMs": 2400, "segs": [{"utf8": "a new\nMoE model"}]}
        ]
    }"#;

    #[test]
    fn parses_track_list() {
        assert_eq!(parse_track_list(TRACK_LIST.as_bytes()), vec!["de", "en-GB"]);
        assert!(parse_track_list(b"<transcript_list/>").is_empty());
    }

    #[test]
    fn language_choice_prefers_requested_then_english() {
        let available = vec!["de".to_string(), "en-GB".to_string()];
        assert_eq!(choose_language(&available, "de"), Some(("de".into(), false)));
        assert_eq!(choose_language(&available, "en"), Some(("en-GB".into(), false)));
        assert_eq!(choose_language(&available, "fr"), Some(("en-GB".into(), true)));
        assert_eq!(
            choose_language(&["ja".to_string()], "fr"),
            Some(("ja".into(), true))
        );
        assert_eq!(choose_language(&[], "en"), None);
    }

    #[test]
    fn parses_json3_segments() {
        let segments = parse_json3(JSON3.as_bytes()).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Mistral just released");
        assert_eq!(segments[0].start, 1.2);
        assert_eq!(segments[1].text, "a new MoE model");

        let transcript = Transcript {
            language: "en".into(),
            fallback_language: false,
            segments,
        };
        assert_eq!(transcript.full_text(), "Mistral just released a new MoE model");
        assert!((transcript.duration() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn empty_track_has_no_segments() {
        assert!(parse_json3(b"").unwrap().is_empty());
        assert!(parse_json3(b"{}").unwrap().is_empty());
        assert!(parse_json3(b"<html>").is_err());
    }

    #[test]
    fn transcript_replaces_body_and_keeps_description() {
        let item = ContentItem::new("yt", "abcDEF12345", "MoE explained", "Channel blurb", Utc::now());
        let transcript = Transcript {
            language: "en".into(),
            fallback_language: true,
            segments: parse_json3(JSON3.as_bytes()).unwrap(),
        };
        let item = transcript.attach_to(item);

        assert_eq!(item.body, "Mistral just released a new MoE model");
        assert_eq!(
            item.metadata.get("description"),
            Some(&MetadataValue::Text("Channel blurb".into()))
        );
        assert_eq!(item.metadata.get("transcript_segments"), Some(&MetadataValue::Int(2)));
        assert_eq!(item.metadata.get("fallback_language"), Some(&MetadataValue::Bool(true)));
    }

    #[test]
    fn urls_escape_parameters() {
        assert_eq!(
            track_url("abcDEF12345", "en").unwrap(),
            "https://www.youtube.com/api/timedtext?v=abcDEF12345&lang=en&fmt=json3"
        );
        assert_eq!(
            track_list_url("abcDEF12345").unwrap(),
            "https://www.youtube.com/api/timedtext?type=list&v=abcDEF12345"
        );
    }
}
