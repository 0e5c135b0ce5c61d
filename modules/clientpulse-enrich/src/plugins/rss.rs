//! RSS/Atom feed aggregation.
//!
//! All configured feeds are fetched concurrently; one feed failing (bad DNS,
//! timeout, malformed XML) never drops the other feeds' articles from the
//! same run.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info, warn};
use url::Url;

use clientpulse_common::{EnrichError, Event, FetchArgs, SourceConfig};

use super::ScrapePlugin;

const FEED_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "clientpulse-enrich/0.1";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RssConfig {
    pub urls: Vec<Url>,
}

pub struct RssPlugin {
    name: String,
    urls: Vec<String>,
    http: reqwest::Client,
}

impl RssPlugin {
    pub fn from_source(source: &SourceConfig) -> Result<Self> {
        let config: RssConfig = serde_json::from_value(source.config.clone())
            .with_context(|| format!("invalid rss config for '{}'", source.name))?;
        if config.urls.is_empty() {
            return Err(
                EnrichError::Validation("rss urls list cannot be empty".into()).into(),
            );
        }

        let http = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .expect("Failed to build RSS HTTP client");

        info!(
            plugin = source.name.as_str(),
            feeds = config.urls.len(),
            "RSS plugin initialized"
        );
        Ok(Self {
            name: source.name.clone(),
            urls: config.urls.iter().map(|u| u.to_string()).collect(),
            http,
        })
    }

    /// Fetch and parse one feed into events.
    async fn fetch_feed(&self, feed_url: &str) -> Result<Vec<Event>> {
        let resp = self
            .http
            .get(feed_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("RSS feed fetch failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("RSS feed returned status {status}");
        }

        let bytes = resp.bytes().await.context("Failed to read RSS feed body")?;
        let feed = feed_rs::parser::parse(&bytes[..]).context("Failed to parse RSS/Atom feed")?;

        if feed.entries.is_empty() {
            warn!(feed_url, "No articles found in feed");
            return Ok(vec![]);
        }

        let events: Vec<Event> = feed
            .entries
            .into_iter()
            .map(|entry| self.entry_to_event(entry))
            .collect();

        info!(feed_url, articles = events.len(), "Parsed feed");
        Ok(events)
    }

    fn entry_to_event(&self, entry: feed_rs::model::Entry) -> Event {
        let title = entry.title.map(|t| t.content);
        let link = entry.links.first().map(|l| l.href.clone());
        let summary = entry
            .summary
            .map(|t| strip_html(&t.content))
            .unwrap_or_default();

        // feed-rs already best-effort-parses RFC 822 / RFC 3339 dates.
        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        Event {
            source: "rss".to_string(),
            source_type: self.name.clone(),
            title,
            text: summary,
            url: link,
            published_at,
            profile_data: None,
        }
    }
}

/// Remove markup from a feed summary: strip tags, decode entities, trim.
fn strip_html(raw: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let re = TAGS.get_or_init(|| Regex::new(r"<[^<]+?>").expect("Invalid HTML tag regex"));

    let stripped = re.replace_all(raw, "");
    html_escape::decode_html_entities(stripped.trim()).into_owned()
}

#[async_trait]
impl ScrapePlugin for RssPlugin {
    async fn fetch(&self, _args: &FetchArgs) -> Result<Vec<Event>> {
        info!(plugin = self.name.as_str(), "Fetching RSS feeds");

        let tasks = self.urls.iter().map(|url| self.fetch_feed(url));
        let results = join_all(tasks).await;

        let mut all_events = Vec::new();
        for (url, result) in self.urls.iter().zip(results) {
            match result {
                Ok(events) => all_events.extend(events),
                Err(e) => {
                    // Isolate the failure; the other feeds' articles stand.
                    error!(feed_url = url.as_str(), error = %e, "Feed failed");
                }
            }
        }

        info!(
            plugin = self.name.as_str(),
            articles = all_events.len(),
            "RSS extraction completed"
        );
        Ok(all_events)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn source(urls: Vec<&str>) -> SourceConfig {
        serde_json::from_value(serde_json::json!({
            "name": "sector rss",
            "plugin_type": "rss",
            "config": {"urls": urls}
        }))
        .unwrap()
    }

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Sector News</title>
  <item>
    <title>Acme raises a round</title>
    <link>https://news.example/acme</link>
    <description>&lt;p&gt;Acme &amp;amp; friends raised &lt;b&gt;money&lt;/b&gt;&lt;/p&gt;</description>
    <pubDate>Mon, 02 Jun 2025 08:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Second story</title>
    <link>https://news.example/second</link>
    <description>Plain summary</description>
  </item>
</channel></rss>"#;

    /// Serve one canned HTTP response, then close.
    async fn serve_once(body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/rss+xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{addr}/feed.xml")
    }

    #[test]
    fn strip_html_removes_tags_and_entities() {
        let cleaned = strip_html("<p>Acme &amp; friends raised <b>money</b></p>");
        assert_eq!(cleaned, "Acme & friends raised money");
    }

    #[test]
    fn empty_url_list_is_rejected() {
        assert!(RssPlugin::from_source(&source(vec![])).is_err());
    }

    #[tokio::test]
    async fn parses_feed_into_events() {
        let url = serve_once(SAMPLE_FEED).await;
        let plugin = RssPlugin::from_source(&source(vec![&url])).unwrap();

        let events = plugin.fetch(&FetchArgs::default()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source, "rss");
        assert_eq!(events[0].source_type, "sector rss");
        assert_eq!(events[0].title.as_deref(), Some("Acme raises a round"));
        assert_eq!(events[0].text, "Acme & friends raised money");
        assert!(events[0].published_at.is_some());
        assert!(events[1].published_at.is_none());
    }

    #[tokio::test]
    async fn one_dead_feed_does_not_suppress_the_healthy_one() {
        let healthy = serve_once(SAMPLE_FEED).await;
        // Unroutable port: connection refused, not a timeout.
        let dead = "http://127.0.0.1:9/feed.xml";
        let plugin = RssPlugin::from_source(&source(vec![dead, &healthy])).unwrap();

        let events = plugin.fetch(&FetchArgs::default()).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
