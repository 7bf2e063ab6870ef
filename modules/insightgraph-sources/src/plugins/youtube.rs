// YouTube channel plugin. Reads the channel's public Atom feed; each item is
// keyed by its video id. When transcripts are enabled (the default) the
// item body is the video transcript, fetched a few videos at a time; videos
// without captions keep the feed description.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use regex::Regex;
use tracing::{debug, warn};

use insightgraph_common::{Capability, ContentItem, MetadataValue, SourceConfig};

use super::feed::strip_html;
use super::transcript::{self, DEFAULT_LANGUAGE};
use super::HttpSource;
use crate::plugin::{ContentStream, FetchParams, SourcePlugin};

const CHANNEL_FEED_URL: &str = "https://www.youtube.com/feeds/videos.xml";

/// Transcript requests in flight per fetch.
const TRANSCRIPT_CONCURRENCY: usize = 5;

static VIDEO_URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/|youtube\.com/embed/)([^&\n?#/]+)",
        r"youtube\.com/v/([^&\n?#/]+)",
        r"youtube\.com/shorts/([^&\n?#/]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid video url regex"))
    .collect()
});

static BARE_VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("Invalid video id regex"));

/// Extract a video id from the common YouTube URL shapes, or accept a bare
/// 11-character id.
pub fn extract_video_id(url: &str) -> Option<String> {
    let trimmed = url.trim();
    for pattern in VIDEO_URL_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(trimmed) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
    }
    if let Some(id) = trimmed.strip_prefix("yt:video:") {
        return Some(id.to_string());
    }
    BARE_VIDEO_ID
        .is_match(trimmed)
        .then(|| trimmed.to_string())
}

pub struct YouTubePlugin {
    source_id: String,
    channel_id: Option<String>,
    transcripts: bool,
    language: String,
    http: HttpSource,
}

impl YouTubePlugin {
    /// Settings: `channel_id` (required), `transcripts` (`"false"` turns
    /// transcript fetching off) and `language` (preferred caption language).
    pub fn from_config(config: &SourceConfig, http: HttpSource) -> Self {
        Self {
            source_id: config.source_id.clone(),
            channel_id: config.setting("channel_id").map(str::to_string),
            transcripts: config.setting("transcripts") != Some("false"),
            language: config
                .setting("language")
                .unwrap_or(DEFAULT_LANGUAGE)
                .to_string(),
            http,
        }
    }

    async fn with_transcript(&self, item: ContentItem) -> ContentItem {
        let video_id = match item.metadata.get("video_id") {
            Some(MetadataValue::Text(id)) => id.clone(),
            _ => return item,
        };
        match transcript::fetch_transcript(&self.http, &video_id, &self.language).await {
            Ok(Some(transcript)) => transcript.attach_to(item),
            Ok(None) => {
                debug!(video_id = video_id.as_str(), "No captions, keeping description");
                item.with_metadata("has_transcript", false)
            }
            Err(e) => {
                warn!(
                    source_id = self.source_id.as_str(),
                    video_id = video_id.as_str(),
                    error = %e,
                    "Transcript fetch failed, keeping description"
                );
                item.with_metadata("has_transcript", false)
            }
        }
    }

    fn feed_url(&self) -> Option<String> {
        self.channel_id
            .as_deref()
            .map(|id| format!("{CHANNEL_FEED_URL}?channel_id={id}"))
    }
}

fn is_channel_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl SourcePlugin for YouTubePlugin {
    fn kind(&self) -> &str {
        "youtube"
    }

    fn validate_config(&self, config: &SourceConfig) -> bool {
        config.setting("channel_id").is_some_and(is_channel_id)
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Stream])
    }

    fn fetch_content(&self, params: FetchParams) -> ContentStream<'_> {
        Box::pin(async_stream::try_stream! {
            let url = self.feed_url().context("youtube plugin has no channel_id configured")?;
            let bytes = self.http.get_bytes(&url).await?;
            let items = parse_channel_feed(&self.source_id, &bytes, &params)?;
            if self.transcripts {
                let mut enriched = std::pin::pin!(futures::stream::iter(items)
                    .map(|item| self.with_transcript(item))
                    .buffered(TRANSCRIPT_CONCURRENCY));
                while let Some(item) = enriched.next().await {
                    yield item;
                }
            } else {
                for item in items {
                    yield item;
                }
            }
        })
    }
}

/// Parse a channel Atom feed. Entries without a recognizable video id are
/// dropped.
pub fn parse_channel_feed(
    source_id: &str,
    bytes: &[u8],
    params: &FetchParams,
) -> Result<Vec<ContentItem>> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse YouTube channel feed")?;
    let channel = feed.title.map(|t| t.content);

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let video_id = link
                .as_deref()
                .and_then(extract_video_id)
                .or_else(|| extract_video_id(&entry.id))?;
            let created_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);
            if !params.admits(created_at) {
                return None;
            }
            let description = entry
                .media
                .iter()
                .find_map(|m| m.description.as_ref().map(|d| d.content.clone()))
                .or_else(|| entry.summary.map(|s| s.content))
                .map(|d| strip_html(&d))
                .unwrap_or_default();
            let title = entry.title.map(|t| t.content).unwrap_or_default();

            let mut item = ContentItem::new(source_id, &video_id, title, description, created_at)
                .with_metadata("video_id", video_id.clone())
                .with_metadata("url", format!("https://www.youtube.com/watch?v={video_id}"));
            if let Some(channel) = &channel {
                item = item.with_metadata("channel", channel.clone());
            }
            Some(item)
        })
        .take(params.limit.unwrap_or(usize::MAX))
        .collect())
}
