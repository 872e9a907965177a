//! Upstream feed service client
//!
//! Fetches articles from the feed service and normalizes them into a
//! uniform shape for the discovery engine. The service speaks several
//! dialects, tried in a fixed order:
//!
//! - `GET /articles/recent.json?since=<ms>&limit=N` — recent articles as JSON
//! - `GET /feeds/all.atom?limit=N` — full listing as Atom, with an RSS fallback
//! - `GET /feeds/{id}/articles.json`, `/feeds/{id}.json`,
//!   `/api/feeds/{id}/articles` — per-feed article listings
//! - `GET /articles/{id}.json` — single article detail
//!
//! Calls are retried with jittered backoff on {429, 500, 502, 503, 504};
//! connection failures surface as [`FeedError::Unavailable`].

use crate::config::FeedConfig;
use crate::error::{Error, FeedError, Result};
use crate::retry::with_retry;
use crate::types::ArticleId;
use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Article normalized from any of the feed service's dialects
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedArticle {
    /// Article id; synthesized from the link when the feed omits one
    pub id: ArticleId,
    /// Article title, trimmed
    pub title: String,
    /// Article URL
    pub url: String,
    /// Publisher display name
    pub mp_name: String,
    /// Publisher id
    pub mp_id: String,
    /// Publish time as Unix seconds
    pub publish_time: i64,
    /// Article description or summary
    pub description: String,
    /// Leading slice of the article content, when the feed inlines it
    pub content_snippet: String,
    /// Dispatch priority requested by the feed (0 when absent)
    pub priority: i64,
}

/// HTTP client for the upstream feed service
pub struct FeedClient {
    http_client: reqwest::Client,
    base_url: String,
    config: FeedConfig,
}

impl FeedClient {
    /// Create a client for the configured feed service
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("Genesis-Connector/1.0.0")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    /// Check that the feed service answers its root path
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.as_u16() == 302
            }
            Err(e) => {
                warn!(error = %e, "Feed service health check failed");
                false
            }
        }
    }

    /// Fetch articles published within the last `hours`
    ///
    /// Both a missing endpoint and an empty result read as "no recent
    /// articles", which sends the discovery engine down the full-listing
    /// fallback. Connection failures surface as [`FeedError::Unavailable`].
    pub async fn recent_articles(&self, hours: u32, limit: u32) -> Result<Vec<Value>> {
        let since_ms = (Utc::now().timestamp() - (hours as i64) * 3600) * 1000;
        let url = format!("{}/articles/recent.json", self.base_url);

        debug!(hours = hours, limit = limit, "Fetching recent articles");

        let result = self
            .get_json(&url, &[("since", since_ms.to_string()), ("limit", limit.to_string())])
            .await;

        match result {
            Ok(body) => {
                let articles = as_article_list(body);
                info!(count = articles.len(), "Retrieved recent articles");
                Ok(articles)
            }
            Err(Error::Feed(FeedError::Status { status })) => {
                warn!(status = status, "Recent articles endpoint unavailable");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the full article listing from the Atom feed
    ///
    /// `limit = 0` requests everything the service will give (the service
    /// caps internally). The body is parsed as Atom first, then RSS.
    pub async fn all_articles(&self, limit: u32) -> Result<Vec<Value>> {
        let url = format!("{}/feeds/all.atom", self.base_url);
        let effective_limit = if limit == 0 { 10_000 } else { limit };

        info!(limit = effective_limit, "Fetching full article listing");

        let body = self
            .get_text(&url, &[("limit", effective_limit.to_string())])
            .await?;

        let articles = parse_feed(&body)?;
        info!(count = articles.len(), "Parsed articles from feed listing");
        Ok(articles)
    }

    /// Fetch articles of a single feed, trying the known endpoints in order
    pub async fn feed_articles(&self, feed_id: &str, limit: u32) -> Result<Vec<Value>> {
        let endpoints = [
            format!("{}/feeds/{feed_id}/articles.json", self.base_url),
            format!("{}/feeds/{feed_id}.json", self.base_url),
            format!("{}/api/feeds/{feed_id}/articles", self.base_url),
        ];

        for url in &endpoints {
            debug!(url = %url, "Trying feed endpoint");
            match self.get_json(url, &[("limit", limit.to_string())]).await {
                Ok(body) => {
                    let articles = as_article_list(body);
                    info!(feed_id = feed_id, count = articles.len(), "Retrieved feed articles");
                    return Ok(articles);
                }
                Err(Error::Feed(FeedError::Status { .. })) => continue,
                Err(e) => return Err(e),
            }
        }

        warn!(feed_id = feed_id, "No valid endpoint found for feed");
        Ok(Vec::new())
    }

    /// Fetch one article's detail record, if the service knows it
    pub async fn article_detail(&self, id: &ArticleId) -> Result<Option<Value>> {
        let url = format!("{}/articles/{id}.json", self.base_url);
        match self.get_json(&url, &[]).await {
            Ok(body) => Ok(Some(body)),
            Err(Error::Feed(FeedError::Status { status })) => {
                warn!(article_id = %id, status = status, "Article detail not available");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Normalize a raw article from any dialect
    ///
    /// A missing id is synthesized from the link; a missing link makes the
    /// article invalid.
    pub fn normalize(&self, raw: &Value) -> Result<NormalizedArticle> {
        let url = string_field(raw, "link")
            .or_else(|| string_field(raw, "url"))
            .unwrap_or_default();
        if url.is_empty() {
            return Err(Error::InvalidArticle("article has no link".into()));
        }

        let id = string_field(raw, "id")
            .or_else(|| string_field(raw, "article_id"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| synthesize_id(&url));

        let feed_info = raw.get("feed_info");
        let mp_name = string_field(raw, "mp_name")
            .or_else(|| feed_info.and_then(|f| string_field(f, "mp_name")))
            .or_else(|| string_field(raw, "author"))
            .unwrap_or_default();
        let mp_id = string_field(raw, "mp_id")
            .or_else(|| feed_info.and_then(|f| string_field(f, "mp_id")))
            .or_else(|| string_field(raw, "feed_id"))
            .unwrap_or_default();

        let content_snippet = string_field(raw, "content")
            .map(|c| c.chars().take(500).collect())
            .unwrap_or_default();

        Ok(NormalizedArticle {
            id: ArticleId::new(id),
            title: string_field(raw, "title").unwrap_or_default().trim().to_string(),
            url,
            mp_name,
            mp_id,
            publish_time: parse_publish_time(raw),
            description: string_field(raw, "description").unwrap_or_default(),
            content_snippet,
            priority: raw.get("priority").and_then(Value::as_i64).unwrap_or(0),
        })
    }

    /// GET a JSON body with the retry policy applied
    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let body = self.get_text(url, params).await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Feed(FeedError::Parse(format!("invalid JSON: {e}"))))
    }

    /// GET a text body with the retry policy applied
    async fn get_text(&self, url: &str, params: &[(&str, String)]) -> Result<String> {
        with_retry(&self.config.retry, || async {
            let response = self
                .http_client
                .get(url)
                .query(params)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        Error::Feed(FeedError::Unavailable(e.to_string()))
                    } else {
                        Error::Network(e)
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::Feed(FeedError::Status {
                    status: status.as_u16(),
                }));
            }

            response.text().await.map_err(Error::Network)
        })
        .await
    }
}

/// Accept both a bare array and an `{"articles": [...]}` wrapper
fn as_article_list(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("articles") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Derive an id from the link: last path segment, or a hash of the link
fn synthesize_id(link: &str) -> String {
    let trimmed = link.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next().unwrap_or("");
    if !segment.is_empty() && !segment.contains(':') {
        return segment.to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Parse a publish time out of whichever field the dialect uses
///
/// Integers above 10^10 are treated as milliseconds; strings are tried as
/// RFC 3339 then RFC 2822. Articles without a usable time default to now.
pub fn parse_publish_time(article: &Value) -> i64 {
    const TIME_FIELDS: [&str; 6] = [
        "publish_time",
        "pubDate",
        "published",
        "updated",
        "date",
        "timestamp",
    ];

    for field in TIME_FIELDS {
        let Some(value) = article.get(field) else {
            continue;
        };

        if let Some(number) = value.as_i64() {
            if number > 10_000_000_000 {
                return number / 1000;
            }
            return number;
        }
        if let Some(number) = value.as_f64() {
            let secs = if number > 1e10 { number / 1000.0 } else { number };
            return secs as i64;
        }

        if let Some(text) = value.as_str() {
            if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text) {
                return parsed.timestamp();
            }
            if let Ok(parsed) = chrono::DateTime::parse_from_rfc2822(text) {
                return parsed.timestamp();
            }
        }
    }

    debug!("No valid publish time found, using current time");
    Utc::now().timestamp()
}

/// Parse a feed body as Atom, falling back to RSS
pub fn parse_feed(content: &str) -> Result<Vec<Value>> {
    match parse_atom(content) {
        Ok(articles) => {
            debug!(count = articles.len(), "Parsed feed as Atom");
            Ok(articles)
        }
        Err(atom_err) => match parse_rss(content) {
            Ok(articles) => {
                debug!(count = articles.len(), "Parsed feed as RSS");
                Ok(articles)
            }
            Err(rss_err) => Err(Error::Feed(FeedError::Parse(format!(
                "not Atom ({atom_err}) nor RSS ({rss_err})"
            )))),
        },
    }
}

/// Parse feed content as Atom
fn parse_atom(content: &str) -> std::result::Result<Vec<Value>, String> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes()).map_err(|e| e.to_string())?;

    let articles = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            // Prefer the alternate link, fall back to the first
            let link = entry
                .links()
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| entry.links().first())
                .map(|l| l.href().to_string())?;

            let id = if entry.id().is_empty() {
                synthesize_id(&link)
            } else {
                entry.id().to_string()
            };

            let author = entry
                .authors()
                .first()
                .map(|person| person.name().to_string())
                .unwrap_or_default();

            Some(json!({
                "id": id,
                "title": entry.title().as_str(),
                "link": link,
                "url": link,
                "author": author,
                "mp_name": author,
                "description": entry.summary().map(|s| s.as_str().to_string()).unwrap_or_default(),
                "published": entry.published().map(|dt| dt.to_rfc3339()),
                "updated": entry.updated().to_rfc3339(),
            }))
        })
        .collect();

    Ok(articles)
}

/// Parse feed content as RSS 2.0
fn parse_rss(content: &str) -> std::result::Result<Vec<Value>, String> {
    let channel = content.parse::<rss::Channel>().map_err(|e| e.to_string())?;

    let articles = channel
        .items()
        .iter()
        .filter_map(|item| {
            let link = item.link()?.to_string();

            let id = item
                .guid()
                .map(|g| g.value().to_string())
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| synthesize_id(&link));

            let author = item.author().unwrap_or_default().to_string();

            Some(json!({
                "id": id,
                "title": item.title().unwrap_or_default(),
                "link": link,
                "url": link,
                "author": author,
                "mp_name": author,
                "description": item.description().unwrap_or_default(),
                "pubDate": item.pub_date(),
            }))
        })
        .collect();

    Ok(articles)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
