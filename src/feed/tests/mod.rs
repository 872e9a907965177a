use super::*;
use crate::config::{FeedConfig, RetryConfig};
use crate::error::{Error, FeedError};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config(url: &str) -> FeedConfig {
    FeedConfig {
        url: url.to_string(),
        timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    }
}

const ATOM_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>All Feeds</title>
  <id>urn:feeds:all</id>
  <updated>2024-05-01T12:00:00Z</updated>
  <entry>
    <id>atom-1</id>
    <title>First article</title>
    <link rel="alternate" href="http://h/articles/atom-1"/>
    <author><name>Daily Publisher</name></author>
    <summary>Summary one</summary>
    <published>2024-05-01T10:00:00Z</published>
    <updated>2024-05-01T11:00:00Z</updated>
  </entry>
  <entry>
    <id></id>
    <title>Second article</title>
    <link href="http://h/articles/atom-2"/>
    <updated>2024-05-01T09:00:00Z</updated>
  </entry>
</feed>"#;

const RSS_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0">
  <channel>
    <title>All Feeds</title>
    <link>http://h/</link>
    <description>listing</description>
    <item>
      <title>RSS article</title>
      <link>http://h/articles/rss-1</link>
      <guid>rss-1</guid>
      <pubDate>Wed, 01 May 2024 10:00:00 +0000</pubDate>
      <description>desc</description>
      <author>Weekly Publisher</author>
    </item>
  </channel>
</rss>"#;

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

#[test]
fn normalize_extracts_all_fields() {
    let client = FeedClient::new(&fast_config("http://h")).unwrap();
    let raw = serde_json::json!({
        "id": "a1",
        "title": "  Spaced title  ",
        "link": "http://h/articles/a1",
        "mp_name": "Daily Publisher",
        "mp_id": "mp-1",
        "publish_time": 1_700_000_000,
        "description": "desc",
        "content": "body text",
        "priority": 2,
    });

    let article = client.normalize(&raw).unwrap();
    assert_eq!(article.id.as_str(), "a1");
    assert_eq!(article.title, "Spaced title");
    assert_eq!(article.url, "http://h/articles/a1");
    assert_eq!(article.mp_name, "Daily Publisher");
    assert_eq!(article.mp_id, "mp-1");
    assert_eq!(article.publish_time, 1_700_000_000);
    assert_eq!(article.priority, 2);
    assert_eq!(article.content_snippet, "body text");
}

#[test]
fn normalize_synthesizes_id_from_link() {
    let client = FeedClient::new(&fast_config("http://h")).unwrap();
    let raw = serde_json::json!({
        "link": "http://h/articles/generated-42",
        "title": "No id",
    });

    let article = client.normalize(&raw).unwrap();
    assert_eq!(article.id.as_str(), "generated-42");
}

#[test]
fn normalize_falls_back_to_feed_info_for_publisher() {
    let client = FeedClient::new(&fast_config("http://h")).unwrap();
    let raw = serde_json::json!({
        "id": "a1",
        "link": "http://h/a1",
        "feed_info": { "mp_name": "Nested Publisher", "mp_id": "mp-9" },
    });

    let article = client.normalize(&raw).unwrap();
    assert_eq!(article.mp_name, "Nested Publisher");
    assert_eq!(article.mp_id, "mp-9");
}

#[test]
fn normalize_rejects_article_without_link() {
    let client = FeedClient::new(&fast_config("http://h")).unwrap();
    let raw = serde_json::json!({ "id": "a1", "title": "No link" });

    match client.normalize(&raw) {
        Err(Error::InvalidArticle(_)) => {}
        other => panic!("expected InvalidArticle, got {other:?}"),
    }
}

#[test]
fn normalize_truncates_content_snippet() {
    let client = FeedClient::new(&fast_config("http://h")).unwrap();
    let raw = serde_json::json!({
        "id": "a1",
        "link": "http://h/a1",
        "content": "x".repeat(2000),
    });

    let article = client.normalize(&raw).unwrap();
    assert_eq!(article.content_snippet.len(), 500);
}

// ---------------------------------------------------------------------------
// Publish-time coercion
// ---------------------------------------------------------------------------

#[test]
fn publish_time_detects_milliseconds_by_magnitude() {
    let seconds = serde_json::json!({ "publish_time": 1_700_000_000i64 });
    assert_eq!(parse_publish_time(&seconds), 1_700_000_000);

    let millis = serde_json::json!({ "publish_time": 1_700_000_000_000i64 });
    assert_eq!(parse_publish_time(&millis), 1_700_000_000);
}

#[test]
fn publish_time_parses_iso_and_rfc2822_strings() {
    let iso = serde_json::json!({ "published": "2024-05-01T10:00:00Z" });
    assert_eq!(parse_publish_time(&iso), 1_714_557_600);

    let rfc2822 = serde_json::json!({ "pubDate": "Wed, 01 May 2024 10:00:00 +0000" });
    assert_eq!(parse_publish_time(&rfc2822), 1_714_557_600);
}

#[test]
fn publish_time_defaults_to_now_when_unparsable() {
    let before = chrono::Utc::now().timestamp();
    let parsed = parse_publish_time(&serde_json::json!({ "published": "not a date" }));
    let after = chrono::Utc::now().timestamp();

    assert!(
        parsed >= before && parsed <= after,
        "unparsable time should default to now"
    );
}

// ---------------------------------------------------------------------------
// Feed body parsing
// ---------------------------------------------------------------------------

#[test]
fn atom_entries_become_raw_articles() {
    let articles = parse_feed(ATOM_BODY).unwrap();
    assert_eq!(articles.len(), 2);

    assert_eq!(articles[0]["id"], "atom-1");
    assert_eq!(articles[0]["title"], "First article");
    assert_eq!(articles[0]["link"], "http://h/articles/atom-1");
    assert_eq!(articles[0]["mp_name"], "Daily Publisher");
    assert_eq!(articles[0]["description"], "Summary one");

    // Entry with an empty id gets one synthesized from the link
    assert_eq!(articles[1]["id"], "atom-2");
}

#[test]
fn rss_items_become_raw_articles() {
    let articles = parse_feed(RSS_BODY).unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0]["id"], "rss-1");
    assert_eq!(articles[0]["link"], "http://h/articles/rss-1");
    assert_eq!(articles[0]["mp_name"], "Weekly Publisher");
    assert_eq!(articles[0]["pubDate"], "Wed, 01 May 2024 10:00:00 +0000");
}

#[test]
fn unparsable_bodies_are_feed_parse_errors() {
    match parse_feed("this is not xml at all") {
        Err(Error::Feed(FeedError::Parse(_))) => {}
        other => panic!("expected parse error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// HTTP behavior against a mock feed service
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recent_articles_returns_json_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/recent.json"))
        .and(query_param("limit", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": "a1", "link": "http://h/a1", "title": "One" },
            { "id": "a2", "link": "http://h/a2", "title": "Two" },
        ])))
        .mount(&server)
        .await;

    let client = FeedClient::new(&fast_config(&server.uri())).unwrap();
    let articles = client.recent_articles(24, 1000).await.unwrap();
    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0]["id"], "a1");
}

#[tokio::test]
async fn missing_recent_endpoint_reads_as_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/recent.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = FeedClient::new(&fast_config(&server.uri())).unwrap();
    let articles = client.recent_articles(24, 1000).await.unwrap();
    assert!(articles.is_empty());
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let server = MockServer::start().await;

    // Two failures, then the listing succeeds
    Mock::given(method("GET"))
        .and(path("/feeds/all.atom"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feeds/all.atom"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM_BODY))
        .mount(&server)
        .await;

    let client = FeedClient::new(&fast_config(&server.uri())).unwrap();
    let articles = client.all_articles(100).await.unwrap();
    assert_eq!(articles.len(), 2);
}

#[tokio::test]
async fn feed_articles_tries_endpoints_in_order() {
    let server = MockServer::start().await;

    // First endpoint missing, second answers
    Mock::given(method("GET"))
        .and(path("/feeds/f1/articles.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feeds/f1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": "a1", "link": "http://h/a1" },
        ])))
        .mount(&server)
        .await;

    let client = FeedClient::new(&fast_config(&server.uri())).unwrap();
    let articles = client.feed_articles("f1", 100).await.unwrap();
    assert_eq!(articles.len(), 1);
}

#[tokio::test]
async fn article_detail_handles_missing_articles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/a1.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "a1" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/articles/ghost.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = FeedClient::new(&fast_config(&server.uri())).unwrap();

    let found = client.article_detail(&ArticleId::from("a1")).await.unwrap();
    assert_eq!(found.unwrap()["id"], "a1");

    let missing = client.article_detail(&ArticleId::from("ghost")).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn health_check_accepts_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = FeedClient::new(&fast_config(&server.uri())).unwrap();
    assert!(client.health_check().await);
}

#[tokio::test]
async fn unreachable_service_surfaces_as_unavailable() {
    // Nothing listens on this port
    let client = FeedClient::new(&fast_config("http://127.0.0.1:9")).unwrap();

    assert!(!client.health_check().await);

    match client.all_articles(10).await {
        Err(Error::Feed(FeedError::Unavailable(_))) => {}
        other => panic!("expected FeedUnavailable, got {other:?}"),
    }
}
