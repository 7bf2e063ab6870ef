// Reddit plugin: subreddit listing via the public JSON endpoints, plus
// subreddit-restricted keyword search.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use insightgraph_common::{Capability, ContentItem, InsightError, SourceConfig};

use super::HttpSource;
use crate::plugin::{ContentStream, FetchParams, SearchFilters, SourcePlugin};

const REDDIT_BASE: &str = "https://www.reddit.com";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    after: Option<String>,
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    kind: String,
    data: RedditPost,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    created_utc: f64,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    num_comments: Option<i64>,
    #[serde(default)]
    subreddit: Option<String>,
}

/// One parsed listing page: items plus the pagination cursor.
pub struct ListingPage {
    pub items: Vec<ContentItem>,
    pub after: Option<String>,
}

/// Parse a Reddit listing JSON document. Only `t3` (link/self post) children
/// become content items.
pub fn parse_listing(source_id: &str, body: &[u8]) -> Result<ListingPage> {
    let listing: Listing = serde_json::from_slice(body).context("Failed to parse Reddit listing")?;
    let items = listing
        .data
        .children
        .into_iter()
        .filter(|c| c.kind == "t3")
        .map(|c| to_item(source_id, c.data))
        .collect();
    Ok(ListingPage {
        items,
        after: listing.data.after.filter(|a| !a.is_empty()),
    })
}

fn to_item(source_id: &str, post: RedditPost) -> ContentItem {
    let created_at = DateTime::<Utc>::from_timestamp(post.created_utc as i64, 0).unwrap_or_else(Utc::now);
    let mut item = ContentItem::new(source_id, &post.id, post.title, post.selftext, created_at);
    if let Some(permalink) = post.permalink {
        item = item.with_metadata("url", format!("{REDDIT_BASE}{permalink}"));
    }
    if let Some(author) = post.author {
        item = item.with_metadata("author", author);
    }
    if let Some(score) = post.score {
        item = item.with_metadata("score", score);
    }
    if let Some(comments) = post.num_comments {
        item = item.with_metadata("comments", comments);
    }
    if let Some(subreddit) = post.subreddit {
        item = item.with_metadata("subreddit", subreddit);
    }
    item
}

pub struct RedditPlugin {
    source_id: String,
    subreddit: Option<String>,
    http: HttpSource,
}

impl RedditPlugin {
    pub fn from_config(config: &SourceConfig, http: HttpSource) -> Self {
        Self {
            source_id: config.source_id.clone(),
            subreddit: config
                .setting("subreddit")
                .map(|s| s.trim_start_matches("r/").to_string()),
            http,
        }
    }

    fn subreddit(&self) -> Result<&str> {
        self.subreddit
            .as_deref()
            .context("reddit plugin has no subreddit configured")
    }

    fn listing_url(&self, subreddit: &str, limit: usize, after: Option<&str>) -> Result<String> {
        let mut params = vec![("limit", limit.to_string()), ("raw_json", "1".to_string())];
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }
        let url = url::Url::parse_with_params(&format!("{REDDIT_BASE}/r/{subreddit}/new.json"), &params)?;
        Ok(url.to_string())
    }

    fn search_url(&self, subreddit: &str, query: &str, limit: usize) -> Result<String> {
        let url = url::Url::parse_with_params(
            &format!("{REDDIT_BASE}/r/{subreddit}/search.json"),
            &[
                ("q", query.to_string()),
                ("restrict_sr", "1".to_string()),
                ("sort", "new".to_string()),
                ("limit", limit.to_string()),
                ("raw_json", "1".to_string()),
            ],
        )?;
        Ok(url.to_string())
    }
}

fn is_subreddit_name(value: &str) -> bool {
    let name = value.trim_start_matches("r/");
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl SourcePlugin for RedditPlugin {
    fn kind(&self) -> &str {
        "reddit"
    }

    fn validate_config(&self, config: &SourceConfig) -> bool {
        config.setting("subreddit").is_some_and(is_subreddit_name)
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Stream, Capability::Search])
    }

    fn fetch_content(&self, params: FetchParams) -> ContentStream<'_> {
        Box::pin(async_stream::try_stream! {
            let subreddit = self.subreddit()?;
            let mut remaining = params.limit.unwrap_or(PAGE_SIZE * MAX_PAGES);
            let mut after: Option<String> = None;

            for page_no in 0..MAX_PAGES {
                if remaining == 0 {
                    break;
                }
                let url = self.listing_url(subreddit, remaining.min(PAGE_SIZE), after.as_deref())?;
                let body = self.http.get_bytes(&url).await?;
                let page = parse_listing(&self.source_id, &body)?;
                info!(source_id = self.source_id.as_str(), page = page_no, items = page.items.len(), "reddit: fetched page");

                let page_len = page.items.len();
                // Listings are newest first, so the first item older than
                // `since` ends the walk.
                let mut reached_since = false;
                for item in page.items {
                    if !params.admits(item.created_at) {
                        reached_since = true;
                        break;
                    }
                    if remaining == 0 {
                        break;
                    }
                    remaining -= 1;
                    yield item;
                }

                if reached_since || page_len == 0 {
                    break;
                }
                match page.after {
                    Some(next) => after = Some(next),
                    None => break,
                }
            }
        })
    }

    async fn search_content(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<ContentItem>, InsightError> {
        let subreddit = self.subreddit()?;
        let limit = filters.limit.unwrap_or(25).min(PAGE_SIZE);
        let url = self.search_url(subreddit, query, limit)?;
        let body = self
            .http
            .get_bytes(&url)
            .await
            .map_err(|e| InsightError::Fetch(e.to_string()))?;
        let page = parse_listing(&self.source_id, &body)?;

        Ok(page
            .items
            .into_iter()
            .filter(|item| filters.since.is_none_or(|since| item.created_at >= since))
            .take(limit)
            .collect())
    }
}
