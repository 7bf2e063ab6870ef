pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod retry;

pub use plugin::{ContentStream, FetchParams, SearchFilters, SourcePlugin};
pub use plugins::{build_plugin, default_http_client, FeedPlugin, HttpSource, RedditPlugin, YouTubePlugin};
pub use registry::{PluginRegistry, RegisteredSource};
pub use retry::{retry_with_backoff, RetryPolicy, Throttle};
