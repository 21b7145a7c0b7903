//! Moltbook REST adapter: feed observation and the three write actions.
//!
//! Feed reads go through [`RetryExecutor`]; writes are sent exactly once so
//! a timed-out post is never duplicated.

pub mod api;
pub mod rate_limiter;
pub mod retry;

#[cfg(test)]
mod tests;

use agent_core::settings::MoltbookSettings;
use agent_core::{ConfigError, CoreError, Draft, FeedItem, FeedSource, PlatformExecutor, Receipt};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub use api::{FeedSort, MoltbookApiClient, MoltbookPostData};
pub use rate_limiter::RateLimitStatus;
pub use retry::{BreakerState, RetryConfig, RetryExecutor, RetryMetrics};

pub const HOT_FEED_LIMIT: u32 = 15;
pub const NEW_FEED_LIMIT: u32 = 10;
pub const MAX_FEED_ITEMS: usize = 20;
pub const MAX_BROWSE_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct MoltbookConfig {
    pub base_url: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub requests_per_minute: u32,
    pub retry: RetryConfig,
}

impl MoltbookConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let defaults = MoltbookSettings::default();
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            user_agent: defaults.user_agent,
            timeout: Duration::from_secs(defaults.request_timeout_seconds),
            requests_per_minute: defaults.requests_per_minute,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_settings(settings: &MoltbookSettings, api_key: &str) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_key: api_key.to_string(),
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_secs(settings.request_timeout_seconds),
            requests_per_minute: settings.requests_per_minute,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidValue {
            field: "moltbook.base_url".to_string(),
            value: format!("{} ({})", self.base_url, e),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "moltbook.base_url".to_string(),
                value: self.base_url.clone(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "moltbook.api_key".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MoltbookClient {
    api: MoltbookApiClient,
    retry_executor: RetryExecutor,
}

impl MoltbookClient {
    pub fn new(config: MoltbookConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let api = MoltbookApiClient::new(
            config.base_url.clone(),
            config.api_key.clone(),
            &config.user_agent,
            config.timeout,
            config.requests_per_minute,
        )?;

        info!("Moltbook client configured for {}", config.base_url);
        Ok(Self {
            api,
            retry_executor: RetryExecutor::new(config.retry),
        })
    }

    pub fn api(&self) -> &MoltbookApiClient {
        &self.api
    }

    pub fn retry_metrics(&self) -> RetryMetrics {
        self.retry_executor.get_metrics()
    }

    pub async fn rate_limit_status(&self) -> RateLimitStatus {
        self.api.get_rate_limit_status().await
    }

    /// One page of the feed in the given order, for browsing outside a run.
    pub async fn browse(&self, sort: FeedSort, limit: u32) -> Result<Vec<FeedItem>, CoreError> {
        let posts = self.fetch_sorted(sort, limit.clamp(1, MAX_BROWSE_LIMIT)).await?;
        Ok(posts.into_iter().map(FeedItem::from).collect())
    }

    pub async fn profile(&self) -> Result<serde_json::Value, CoreError> {
        self.api.get_profile().await
    }

    async fn fetch_sorted(&self, sort: FeedSort, limit: u32) -> Result<Vec<MoltbookPostData>, CoreError> {
        let operation = format!("fetch {} feed", sort);
        self.retry_executor
            .execute(&operation, || self.api.get_posts(sort, limit))
            .await
    }
}

/// Hot items first, then unseen new items, capped at [`MAX_FEED_ITEMS`].
pub fn merge_feeds(hot: Vec<MoltbookPostData>, new: Vec<MoltbookPostData>) -> Vec<FeedItem> {
    let mut seen = HashSet::new();
    hot.into_iter()
        .chain(new)
        .filter(|post| seen.insert(post.id.clone()))
        .take(MAX_FEED_ITEMS)
        .map(FeedItem::from)
        .collect()
}

#[async_trait]
impl FeedSource for MoltbookClient {
    async fn fetch_feed(&self) -> Result<Vec<FeedItem>, CoreError> {
        let hot = self.fetch_sorted(FeedSort::Hot, HOT_FEED_LIMIT).await?;
        let new = self.fetch_sorted(FeedSort::New, NEW_FEED_LIMIT).await?;
        let feed = merge_feeds(hot, new);
        debug!("Observed {} feed items", feed.len());
        Ok(feed)
    }
}

#[async_trait]
impl PlatformExecutor for MoltbookClient {
    async fn post(&self, draft: &Draft) -> Result<Receipt, CoreError> {
        self.api.create_post(draft).await
    }

    async fn comment(&self, item_id: &str, content: &str) -> Result<Receipt, CoreError> {
        self.api.create_comment(item_id, content).await
    }

    async fn upvote(&self, item_id: &str) -> Result<Receipt, CoreError> {
        self.api.upvote_post(item_id).await
    }
}
