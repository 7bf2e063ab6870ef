// RSS/Atom/JSON feed plugin: newsletters, blogs, forum feeds.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};

use insightgraph_common::{Capability, ContentItem, SourceConfig};

use super::{is_http_url, HttpSource};
use crate::plugin::{ContentStream, FetchParams, SourcePlugin};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid tag regex"));

pub struct FeedPlugin {
    source_id: String,
    url: Option<String>,
    http: HttpSource,
}

impl FeedPlugin {
    pub fn from_config(config: &SourceConfig, http: HttpSource) -> Self {
        Self {
            source_id: config.source_id.clone(),
            url: config.setting("url").map(str::to_string),
            http,
        }
    }
}

#[async_trait]
impl SourcePlugin for FeedPlugin {
    fn kind(&self) -> &str {
        "feed"
    }

    fn validate_config(&self, config: &SourceConfig) -> bool {
        config.setting("url").is_some_and(is_http_url)
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Stream, Capability::Historical])
    }

    fn fetch_content(&self, params: FetchParams) -> ContentStream<'_> {
        Box::pin(async_stream::try_stream! {
            let url = self
                .url
                .as_deref()
                .context("feed plugin has no url configured")?;
            let bytes = self.http.get_bytes(url).await?;
            let items = parse_feed(&self.source_id, &bytes, &params)?;
            tracing::info!(source_id = self.source_id.as_str(), items = items.len(), "feed: parsed");
            for item in items {
                yield item;
            }
        })
    }
}

/// Parse a feed document into content items, honoring `since` and `limit`.
pub fn parse_feed(source_id: &str, bytes: &[u8], params: &FetchParams) -> Result<Vec<ContentItem>> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse RSS/Atom feed")?;
    let feed_title = feed.title.map(|t| t.content);

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let native_id = if entry.id.trim().is_empty() {
                stable_id(link.as_deref()?)
            } else {
                entry.id.clone()
            };
            let created_at = entry
                .published
                .or(entry.updated)
                .unwrap_or_else(Utc::now);
            if !params.admits(created_at) {
                return None;
            }

            let title = entry.title.map(|t| strip_html(&t.content)).unwrap_or_default();
            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .map(|b| strip_html(&b))
                .unwrap_or_default();

            let mut item = ContentItem::new(source_id, &native_id, title, body, created_at);
            if let Some(link) = link {
                item = item.with_metadata("url", link);
            }
            if let Some(author) = entry.authors.first() {
                item = item.with_metadata("author", author.name.clone());
            }
            if let Some(feed_title) = &feed_title {
                item = item.with_metadata("feed_title", feed_title.clone());
            }
            Some(item)
        })
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();

    Ok(items)
}

/// Crude HTML → text: drop tags, decode the handful of common entities,
/// collapse whitespace.
pub fn strip_html(input: &str) -> String {
    let text = TAG_RE.replace_all(input, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn stable_id(link: &str) -> String {
    let digest = Sha256::digest(link.as_bytes());
    hex::encode(&digest[..8])
}
