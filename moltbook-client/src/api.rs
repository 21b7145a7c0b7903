use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use agent_core::{CoreError, Draft, FeedItem, PlatformError, Receipt};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A post as returned by `GET /posts`. Moltbook omits fields freely, so
/// everything but the id is defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoltbookPostData {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_author")]
    pub author: String,
    #[serde(default, deserialize_with = "deserialize_submolt")]
    pub submolt: String,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Authors and submolts come back either as plain names or as objects.
fn name_from_value(value: Value) -> String {
    match value {
        Value::String(name) => name,
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn deserialize_author<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(name_from_value)
}

fn deserialize_submolt<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(name_from_value)
}

impl From<MoltbookPostData> for FeedItem {
    fn from(post: MoltbookPostData) -> Self {
        let text = post.content.or(post.url).unwrap_or_default();
        Self {
            id: post.id,
            author: post.author,
            title: post.title,
            text,
            submolt: if post.submolt.is_empty() {
                Draft::DEFAULT_SUBMOLT.to_string()
            } else {
                post.submolt
            },
            timestamp: post.created_at,
            upvotes: post.upvotes,
            comment_count: post.comment_count,
        }
    }
}

/// Orderings `GET /posts` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedSort {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl FeedSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSort::Hot => "hot",
            FeedSort::New => "new",
            FeedSort::Top => "top",
            FeedSort::Rising => "rising",
        }
    }
}

impl fmt::Display for FeedSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedSort {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(FeedSort::Hot),
            "new" => Ok(FeedSort::New),
            "top" => Ok(FeedSort::Top),
            "rising" => Ok(FeedSort::Rising),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown feed sort '{}', expected hot, new, top or rising", other),
            }),
        }
    }
}

#[derive(Debug)]
pub struct MoltbookApiClient {
    http_client: Client,
    rate_limiter: RateLimiter,
    base_url: String,
    api_key: String,
}

impl MoltbookApiClient {
    pub fn new(
        base_url: String,
        api_key: String,
        user_agent: &str,
        timeout: Duration,
        requests_per_minute: u32,
    ) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(RateLimitConfig::per_minute(requests_per_minute)),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Value, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);

        self.rate_limiter.acquire().await;
        debug!("Sending {} {}", method, endpoint);

        let mut request_builder = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(&self.api_key);

        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }
        if let Some(body) = body {
            request_builder = request_builder.json(body);
        }

        info!("Making Moltbook API request: {} {}", method, endpoint);
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    return Err(CoreError::Platform(PlatformError::RequestTimeout));
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!("Request successful: {} {}", status, endpoint);
            return response.json::<Value>().await.map_err(|e| {
                error!("Failed to parse response for {}: {}", endpoint, e);
                CoreError::Platform(PlatformError::InvalidResponse {
                    details: format!("{} returned malformed JSON", endpoint),
                })
            });
        }

        error!("Request failed with status: {} for {}", status, endpoint);
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let message = error_message(response.text().await.unwrap_or_default(), status);

        Err(CoreError::Platform(map_status(
            status,
            endpoint,
            message,
            retry_after,
        )))
    }

    pub async fn get_posts(&self, sort: FeedSort, limit: u32) -> Result<Vec<MoltbookPostData>, CoreError> {
        let params = [("sort", sort.to_string()), ("limit", limit.to_string())];
        let data = self
            .make_request(Method::GET, "/posts", Some(&params), None)
            .await?;

        let posts = data
            .get("posts")
            .or_else(|| data.get("data"))
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let posts: Vec<MoltbookPostData> = serde_json::from_value(posts).map_err(|e| {
            error!("Failed to parse feed: {}", e);
            CoreError::Platform(PlatformError::InvalidResponse {
                details: format!("Failed to parse {} feed", sort),
            })
        })?;

        info!("Retrieved {} {} posts", posts.len(), sort);
        Ok(posts)
    }

    pub async fn create_post(&self, draft: &Draft) -> Result<Receipt, CoreError> {
        let mut payload = json!({
            "title": draft.title.as_deref().unwrap_or("Untitled"),
            "submolt": draft.submolt_or_default(),
        });
        if !draft.content.is_empty() {
            payload["content"] = Value::String(draft.content.clone());
        }

        let data = self
            .make_request(Method::POST, "/posts", None, Some(&payload))
            .await?;
        let receipt = receipt_from(data, "post");
        info!("Created post {:?}", receipt.id);
        Ok(receipt)
    }

    pub async fn create_comment(&self, post_id: &str, content: &str) -> Result<Receipt, CoreError> {
        let endpoint = format!("/posts/{}/comments", post_id);
        let payload = json!({ "content": content });

        let data = self
            .make_request(Method::POST, &endpoint, None, Some(&payload))
            .await
            .map_err(|e| not_found_as_post(e, post_id))?;
        let receipt = receipt_from(data, "comment");
        info!("Commented on post {} ({:?})", post_id, receipt.id);
        Ok(receipt)
    }

    pub async fn upvote_post(&self, post_id: &str) -> Result<Receipt, CoreError> {
        let endpoint = format!("/posts/{}/upvote", post_id);

        let data = self
            .make_request(Method::POST, &endpoint, None, None)
            .await
            .map_err(|e| not_found_as_post(e, post_id))?;
        info!("Upvoted post {}", post_id);
        Ok(Receipt {
            id: Some(post_id.to_string()),
            raw: data,
        })
    }

    /// The calling agent's own profile. Unwraps `{"agent": {..}}` when present.
    pub async fn get_profile(&self) -> Result<Value, CoreError> {
        let data = self
            .make_request(Method::GET, "/agents/me", None, None)
            .await?;
        Ok(data.get("agent").cloned().unwrap_or(data))
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.status().await
    }
}

fn map_status(
    status: StatusCode,
    endpoint: &str,
    message: String,
    retry_after: Option<u64>,
) -> PlatformError {
    match status.as_u16() {
        401 => PlatformError::AuthenticationFailed { reason: message },
        403 => PlatformError::Forbidden {
            resource: endpoint.to_string(),
        },
        429 => {
            let retry_after = retry_after.unwrap_or(60);
            warn!("Rate limited, retry after {} seconds", retry_after);
            PlatformError::RateLimitExceeded { retry_after }
        }
        code if status.is_server_error() => PlatformError::ServerError { status_code: code },
        code => PlatformError::Rejected {
            status: code,
            message,
        },
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: String, status: StatusCode) -> String {
    let parsed = serde_json::from_str::<Value>(&body).ok();
    let from_json = parsed.as_ref().and_then(|value| {
        value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

fn not_found_as_post(error: CoreError, post_id: &str) -> CoreError {
    match error {
        CoreError::Platform(PlatformError::Rejected { status: 404, .. }) => {
            CoreError::Platform(PlatformError::PostNotFound {
                post_id: post_id.to_string(),
            })
        }
        other => other,
    }
}

/// Find the created object's id in `{"post": {"id": ..}}`, `{"data": {"id": ..}}`
/// or a bare `{"id": ..}`.
fn receipt_from(data: Value, kind: &str) -> Receipt {
    let id = [data.get(kind), data.get("data"), Some(&data)]
        .into_iter()
        .flatten()
        .find_map(|value| value.get("id"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    Receipt { id, raw: data }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_sort_parsing() {
        assert_eq!("Rising".parse::<FeedSort>().unwrap(), FeedSort::Rising);
        assert_eq!(FeedSort::default().as_str(), "hot");
        assert!(matches!(
            "best".parse::<FeedSort>(),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_post_conversion_defaults() {
        let post: MoltbookPostData = serde_json::from_value(json!({
            "id": "abc",
            "title": "Hello moltys",
            "author": {"name": "clawd"},
            "upvotes": 12
        }))
        .unwrap();

        let item: FeedItem = post.into();
        assert_eq!(item.id, "abc");
        assert_eq!(item.author, "clawd");
        assert_eq!(item.submolt, "general");
        assert_eq!(item.text, "");
        assert_eq!(item.upvotes, 12);
    }

    #[test]
    fn test_receipt_id_lookup() {
        let nested = receipt_from(json!({"success": true, "post": {"id": "p9"}}), "post");
        assert_eq!(nested.id.as_deref(), Some("p9"));

        let bare = receipt_from(json!({"id": 17}), "comment");
        assert_eq!(bare.id.as_deref(), Some("17"));

        let missing = receipt_from(json!({"success": true}), "comment");
        assert!(missing.id.is_none());
    }

    #[test]
    fn test_status_mapping() {
        let err = map_status(StatusCode::TOO_MANY_REQUESTS, "/posts", String::new(), Some(1800));
        assert!(matches!(err, PlatformError::RateLimitExceeded { retry_after: 1800 }));

        let err = map_status(StatusCode::BAD_GATEWAY, "/posts", String::new(), None);
        assert!(matches!(err, PlatformError::ServerError { status_code: 502 }));

        let err = map_status(
            StatusCode::BAD_REQUEST,
            "/posts",
            "title required".to_string(),
            None,
        );
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("title required"));
    }

    #[test]
    fn test_error_message_extraction() {
        let message = error_message(
            r#"{"success":false,"error":"You can only post once every 30 minutes"}"#.to_string(),
            StatusCode::TOO_MANY_REQUESTS,
        );
        assert_eq!(message, "You can only post once every 30 minutes");

        let message = error_message(String::new(), StatusCode::NOT_FOUND);
        assert_eq!(message, "Not Found");
    }
}
