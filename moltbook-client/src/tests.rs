use crate::{merge_feeds, FeedSort, MoltbookClient, MoltbookConfig, MoltbookPostData, RetryConfig};
use agent_core::{CoreError, Draft, FeedSource, PlatformError, PlatformExecutor};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{bearer_token, body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: 0.0,
        breaker_threshold: 10,
        ..RetryConfig::default()
    }
}

fn test_client(server: &MockServer) -> MoltbookClient {
    let config = MoltbookConfig::new(server.uri(), "moltbook_test_key").with_retry(fast_retry());
    MoltbookClient::new(config).unwrap()
}

fn post_json(id: &str, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "content": format!("body of {}", id),
        "author": {"name": "molty"},
        "submolt": {"name": "agents"},
        "upvotes": 3,
        "comment_count": 1
    })
}

fn post_data(id: &str) -> MoltbookPostData {
    serde_json::from_value(post_json(id, id)).unwrap()
}

#[test]
fn test_config_validation() {
    assert!(MoltbookClient::new(MoltbookConfig::new("not a url", "key")).is_err());
    assert!(MoltbookClient::new(MoltbookConfig::new("ftp://moltbook.com", "key")).is_err());

    let missing_key = MoltbookClient::new(MoltbookConfig::new("https://www.moltbook.com/api/v1", " "));
    assert!(matches!(missing_key, Err(CoreError::Config(_))));

    assert!(MoltbookClient::new(MoltbookConfig::new("https://www.moltbook.com/api/v1", "key")).is_ok());
}

#[test]
fn test_merge_feeds_dedupes_and_caps() {
    let hot: Vec<_> = (0..15).map(|i| post_data(&format!("p{}", i))).collect();
    // p10..p14 overlap with hot, p15..p19 are fresh, p20..p24 exceed the cap
    let new: Vec<_> = (10..25).map(|i| post_data(&format!("p{}", i))).collect();

    let feed = merge_feeds(hot, new);
    assert_eq!(feed.len(), 20);
    assert_eq!(feed[0].id, "p0");
    assert_eq!(feed[19].id, "p19");
    assert_eq!(feed[0].submolt, "agents");
    assert_eq!(feed[0].author, "molty");
}

#[tokio::test]
async fn test_fetch_feed_combines_hot_and_new() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("sort", "hot"))
        .and(bearer_token("moltbook_test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "posts": [post_json("a", "First"), post_json("b", "Second")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("sort", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [post_json("b", "Second"), post_json("c", "Third")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let feed = client.fetch_feed().await.unwrap();

    let ids: Vec<_> = feed.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(feed[0].title, "First");
    assert_eq!(feed[0].text, "body of a");

    // Two reads drew two tokens from the pacing bucket
    let pacing = client.rate_limit_status().await;
    assert_eq!(pacing.available_tokens, pacing.burst - 2);
}

#[tokio::test]
async fn test_feed_read_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("sort", "hot"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"posts": []})))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let feed = client.fetch_feed().await.unwrap();
    assert!(feed.is_empty());
    assert_eq!(client.retry_metrics().successful_retries, 1);
}

#[tokio::test]
async fn test_feed_auth_failure_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid API key"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result = client.fetch_feed().await;
    match result {
        Err(CoreError::Platform(PlatformError::AuthenticationFailed { reason })) => {
            assert_eq!(reason, "Invalid API key");
        }
        other => panic!("expected authentication failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_post_returns_receipt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/posts"))
        .and(body_json(json!({
            "title": "Shipping notes",
            "content": "Built a scheduler today.",
            "submolt": "general"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "post": {"id": "post-42"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let draft = Draft::post("Shipping notes", "Built a scheduler today.", None);
    let receipt = client.post(&draft).await.unwrap();
    assert_eq!(receipt.id.as_deref(), Some("post-42"));
}

#[tokio::test]
async fn test_write_is_sent_once_on_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result = client.post(&Draft::post("t", "c", None)).await;
    assert!(matches!(
        result,
        Err(CoreError::Platform(PlatformError::ServerError { status_code: 500 }))
    ));
}

#[tokio::test]
async fn test_post_cooldown_response_maps_to_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/posts"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1800")
                .set_body_json(json!({"error": "You can only post once every 30 minutes"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result = client.post(&Draft::post("t", "c", None)).await;
    assert!(matches!(
        result,
        Err(CoreError::Platform(PlatformError::RateLimitExceeded { retry_after: 1800 }))
    ));
}

#[tokio::test]
async fn test_comment_on_missing_post() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/posts/gone/comments"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Post not found"})))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result = client.comment("gone", "Nice work").await;
    match result {
        Err(CoreError::Platform(PlatformError::PostNotFound { post_id })) => {
            assert_eq!(post_id, "gone");
        }
        other => panic!("expected post not found, got {:?}", other),
    }
}

#[tokio::test]
async fn test_comment_and_upvote() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/posts/p1/comments"))
        .and(body_json(json!({"content": "Agreed, proof of work matters."})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "comment": {"id": "c-7"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/posts/p1/upvote"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let receipt = client
        .comment("p1", "Agreed, proof of work matters.")
        .await
        .unwrap();
    assert_eq!(receipt.id.as_deref(), Some("c-7"));

    let receipt = client.upvote("p1").await.unwrap();
    assert_eq!(receipt.id.as_deref(), Some("p1"));
}

#[tokio::test]
async fn test_rejected_request_keeps_status_and_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/posts"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Title is too long"})),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let error = client.post(&Draft::post("t", "c", None)).await.unwrap_err();
    match error {
        CoreError::Platform(ref platform_error) => {
            assert_eq!(platform_error.status(), Some(400));
            assert!(error.to_string().contains("Title is too long"));
        }
        other => panic!("expected platform rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_browse_uses_requested_sort_and_clamps_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("sort", "top"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "posts": [post_json("t1", "Top of the week")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let items = client.browse(FeedSort::Top, 500).await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "t1");
    assert_eq!(items[0].title, "Top of the week");
}

#[tokio::test]
async fn test_profile_unwraps_agent_object() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/agents/me"))
        .and(bearer_token("moltbook_test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "agent": {"name": "azoni", "karma": 42, "is_claimed": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let profile = client.profile().await.unwrap();

    assert_eq!(profile["name"], "azoni");
    assert_eq!(profile["karma"], 42);
}

#[tokio::test]
async fn test_profile_unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/agents/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid key"})))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result = client.profile().await;

    assert!(matches!(
        result,
        Err(CoreError::Platform(PlatformError::AuthenticationFailed { .. }))
    ));
}
