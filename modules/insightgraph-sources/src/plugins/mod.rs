pub mod feed;
pub mod reddit;
pub mod transcript;
pub mod youtube;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use insightgraph_common::{PluginDescriptor, SourceConfig};

use crate::plugin::SourcePlugin;
use crate::retry::{retry_with_backoff, RetryPolicy, Throttle};

pub use feed::FeedPlugin;
pub use reddit::RedditPlugin;
pub use youtube::YouTubePlugin;

const USER_AGENT: &str = "insightgraph/0.1 (+entity ingestion)";

/// Shared HTTP plumbing for the built-in plugins: one client, the source's
/// rate limit, and bounded retries.
pub struct HttpSource {
    client: reqwest::Client,
    throttle: Throttle,
    retry: RetryPolicy,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, config: &SourceConfig) -> Self {
        Self {
            client,
            throttle: Throttle::per_minute(config.rate_limit.requests_per_minute),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GET `url` and return the body, retrying transport errors and non-2xx.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        retry_with_backoff(&self.retry, url, || async {
            self.throttle.acquire().await;
            let resp = self
                .client
                .get(url)
                .header("User-Agent", USER_AGENT)
                .send()
                .await
                .with_context(|| format!("request to {url} failed"))?;
            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("{url} returned {status}");
            }
            let bytes = resp.bytes().await.context("Failed to read response body")?;
            Ok(bytes.to_vec())
        })
        .await
    }
}

pub fn default_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()?)
}

/// Build the plugin and descriptor for a configured source, selected by
/// `config.kind`.
pub fn build_plugin(
    config: &SourceConfig,
    client: &reqwest::Client,
) -> Result<(PluginDescriptor, Arc<dyn SourcePlugin>)> {
    let http = HttpSource::new(client.clone(), config);
    let plugin: Arc<dyn SourcePlugin> = match config.kind.as_str() {
        "feed" | "rss" | "newsletter" => Arc::new(FeedPlugin::from_config(config, http)),
        "youtube" => Arc::new(YouTubePlugin::from_config(config, http)),
        "reddit" => Arc::new(RedditPlugin::from_config(config, http)),
        other => anyhow::bail!("Unknown plugin kind: {other}"),
    };

    let mut descriptor = PluginDescriptor::new(&config.source_id, plugin.capabilities());
    descriptor.rate_limit = config.rate_limit;
    Ok((descriptor, plugin))
}

/// Accept only absolute http(s) URLs.
pub(crate) fn is_http_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insightgraph_common::Capability;

    #[test]
    fn factory_selects_by_kind() {
        let client = default_http_client().unwrap();
        let config = SourceConfig::new("ml", "reddit").with_setting("subreddit", "MachineLearning");
        let (descriptor, plugin) = build_plugin(&config, &client).unwrap();
        assert_eq!(plugin.kind(), "reddit");
        assert_eq!(descriptor.source_id, "ml");
        assert!(descriptor.supports(Capability::Search));
        assert!(plugin.validate_config(&config));
    }

    #[test]
    fn factory_rejects_unknown_kind() {
        let client = default_http_client().unwrap();
        assert!(build_plugin(&SourceConfig::new("x", "telegraph"), &client).is_err());
    }

    #[test]
    fn http_url_check() {
        assert!(is_http_url("https://example.com/feed.xml"));
        assert!(!is_http_url("ftp://example.com/feed.xml"));
        assert!(!is_http_url("not a url"));
    }
}
