//! Company enrichment via the browser-automation provider.
//!
//! One fetch is a three-step agent chain: find the company's profile URL,
//! then optionally pull structured profile fields and recent posts. The
//! whole fetch holds a global job slot; every agent invocation additionally
//! runs under the plugin's own rate limiter, keyed by agent id.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use automation_client::{AutomationClient, CompanyPost, CompanyUrlRow};
use clientpulse_common::{EnrichError, Event, FetchArgs, SourceConfig};

use crate::limits::{RateLimitConfig, ResourceRateLimiter};

use super::{PluginDeps, ScrapePlugin};

// --- Configuration schema ---

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentIds {
    pub url_finder_id: String,
    pub company_scraper_id: String,
    pub activity_extractor_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(default = "default_calls_per_hour")]
    pub max_calls_per_hour: usize,
    #[serde(default = "default_calls_per_day")]
    pub max_calls_per_day: usize,
    #[serde(default = "default_min_delay")]
    pub min_delay_between_calls: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calls: usize,
}

fn default_calls_per_hour() -> usize {
    10
}
fn default_calls_per_day() -> usize {
    50
}
fn default_min_delay() -> f64 {
    60.0
}
fn default_max_concurrent() -> usize {
    1
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_calls_per_hour: default_calls_per_hour(),
            max_calls_per_day: default_calls_per_day(),
            min_delay_between_calls: default_min_delay(),
            max_concurrent_calls: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkedInConfig {
    pub api_url: String,
    pub api_key: String,
    pub session_cookie: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_max_posts")]
    pub number_max_of_posts: u32,
    #[serde(default)]
    pub verify_tls: bool,
    pub agents: AgentIds,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_max_posts() -> u32 {
    3
}

impl LinkedInConfig {
    fn validate(&mut self) -> std::result::Result<(), EnrichError> {
        if !self.api_url.starts_with("https://") {
            return Err(EnrichError::Validation(
                "api_url must start with https://".into(),
            ));
        }
        self.api_url = self.api_url.trim_end_matches('/').to_string();

        for (field, value) in [
            ("api_key", &mut self.api_key),
            ("session_cookie", &mut self.session_cookie),
        ] {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(EnrichError::Validation(format!("{field} cannot be empty")));
            }
            *value = trimmed.to_string();
        }

        for (field, value) in [
            ("url_finder_id", &self.agents.url_finder_id),
            ("company_scraper_id", &self.agents.company_scraper_id),
            ("activity_extractor_id", &self.agents.activity_extractor_id),
        ] {
            if value.trim().is_empty() {
                return Err(EnrichError::Validation(format!("{field} cannot be empty")));
            }
        }

        if self.rate_limit.max_calls_per_hour < 1 || self.rate_limit.max_calls_per_day < 1 {
            return Err(EnrichError::Validation(
                "rate limit caps must be >= 1".into(),
            ));
        }
        if self.rate_limit.min_delay_between_calls < 0.0 {
            return Err(EnrichError::Validation(
                "min_delay_between_calls must be >= 0".into(),
            ));
        }
        if self.rate_limit.max_concurrent_calls < 1 {
            return Err(EnrichError::Validation(
                "max_concurrent_calls must be >= 1".into(),
            ));
        }

        Ok(())
    }
}

// --- Plugin implementation ---

pub struct LinkedInPlugin {
    name: String,
    config: LinkedInConfig,
    client: AutomationClient,
    rate_limiter: ResourceRateLimiter,
    deps: PluginDeps,
}

impl LinkedInPlugin {
    pub fn from_source(source: &SourceConfig, deps: &PluginDeps) -> Result<Self> {
        let mut config: LinkedInConfig = serde_json::from_value(source.config.clone())
            .with_context(|| format!("invalid linkedin config for '{}'", source.name))?;
        config.validate()?;

        let client = if config.verify_tls {
            AutomationClient::new(&config.api_url, &config.api_key)
        } else {
            AutomationClient::new_insecure(&config.api_url, &config.api_key)
        };

        let rate_limiter = ResourceRateLimiter::new(RateLimitConfig {
            max_calls_per_hour: config.rate_limit.max_calls_per_hour,
            max_calls_per_day: config.rate_limit.max_calls_per_day,
            min_delay_between_calls: Duration::from_secs_f64(
                config.rate_limit.min_delay_between_calls,
            ),
            max_concurrent_calls: config.rate_limit.max_concurrent_calls,
            ..RateLimitConfig::default()
        });

        Ok(Self {
            name: source.name.clone(),
            config,
            client,
            rate_limiter,
            deps: deps.clone(),
        })
    }

    /// Take a rate permit for one agent call. The permit must be held across
    /// launch, polling and download so concurrent callers cannot race the
    /// same agent.
    async fn checked_out_agent(&self, agent_id: &str) -> crate::limits::RatePermit {
        let permit = self.rate_limiter.acquire(agent_id).await;

        let stats = self.rate_limiter.stats(agent_id).await;
        let global = self.rate_limiter.global_stats().await;
        info!(
            agent_id,
            hour = stats.hour,
            day = stats.day,
            global_hour = global.total_calls_last_hour,
            global_day = global.total_calls_last_day,
            "Rate limit usage before agent call"
        );

        permit
    }

    /// Find a company's profile URL from its business name and city.
    /// Returns at most one URL; absence is not an error.
    pub async fn find_company_url(&self, company_name: &str, city: &str) -> Result<Option<String>> {
        let agent_id = self.config.agents.url_finder_id.clone();
        let arguments = json!({
            "csvName": "result",
            "spreadsheetUrl": format!("{company_name} {city}"),
            "numberOfLinesToProcess": 1,
            "sessionCookie": self.config.session_cookie,
            "userAgent": self.config.user_agent,
        });

        info!(company_name, city, "Launching URL-finder agent");
        let _permit = self.checked_out_agent(&agent_id).await;
        let rows: Option<Vec<CompanyUrlRow>> = self
            .client
            .run_agent_rows(&agent_id, arguments)
            .await
            .context("failed to retrieve company URL")?;

        Ok(rows
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|row| row.linkedin_url))
    }

    /// Pull structured profile fields for an already-resolved URL.
    pub async fn fetch_profile(&self, url: &str) -> Result<Option<Map<String, Value>>> {
        let agent_id = self.config.agents.company_scraper_id.clone();
        let arguments = json!({
            "companiesPerLaunch": 1,
            "delayBetween": 2,
            "spreadsheetUrl": url,
            "sessionCookie": self.config.session_cookie,
            "userAgent": self.config.user_agent,
            "saveImg": false,
        });

        info!(url, "Launching company-scraper agent");
        let _permit = self.checked_out_agent(&agent_id).await;
        let Some(doc) = self.client.run_agent(&agent_id, arguments).await? else {
            return Ok(None);
        };

        let Value::Array(rows) = doc else {
            bail!("unexpected profile payload type from automation provider");
        };
        match rows.into_iter().next() {
            Some(Value::Object(profile)) => Ok(Some(profile)),
            Some(_) => bail!("unexpected profile payload type from automation provider"),
            None => Ok(None),
        }
    }

    /// Fetch recent company posts for an already-resolved URL.
    pub async fn fetch_posts(&self, url: &str) -> Result<Option<Vec<CompanyPost>>> {
        let agent_id = self.config.agents.activity_extractor_id.clone();
        let arguments = json!({
            "numberOfLinesPerLaunch": 1,
            "numberMaxOfPosts": self.config.number_max_of_posts,
            "csvName": "result",
            "activitiesToScrape": ["Post"],
            "spreadsheetUrl": url,
            "sessionCookie": self.config.session_cookie,
            "userAgent": self.config.user_agent,
        });

        info!(url, "Launching activity-extractor agent");
        let _permit = self.checked_out_agent(&agent_id).await;
        Ok(self
            .client
            .run_agent_rows(&agent_id, arguments)
            .await
            .context("failed to retrieve company posts")?)
    }
}

/// Stand-in post list for callers that opted out of fetching posts. The
/// exact shape is load-bearing: downstream consumers key on these strings.
fn placeholder_posts() -> Vec<CompanyPost> {
    vec![CompanyPost {
        author: Some("No posts found".to_string()),
        post_content: Some("No posts found".to_string()),
        post_url: Some("No posts found".to_string()),
        post_timestamp: None,
    }]
}

fn parse_post_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn events_from_posts(posts: Vec<CompanyPost>, profile: Option<Map<String, Value>>) -> Vec<Event> {
    posts
        .into_iter()
        .map(|post| Event {
            source: "linkedin".to_string(),
            source_type: "company news".to_string(),
            title: post.author,
            text: post.post_content.unwrap_or_default(),
            url: post.post_url,
            published_at: post.post_timestamp.as_deref().and_then(parse_post_timestamp),
            profile_data: profile.clone(),
        })
        .collect()
}

#[async_trait]
impl ScrapePlugin for LinkedInPlugin {
    async fn fetch(&self, args: &FetchArgs) -> Result<Vec<Event>> {
        let job_name = format!("linkedin:{}", args.company_name);
        let _job = self.deps.job_limiter.acquire(&job_name).await;

        let Some(url) = self
            .find_company_url(&args.company_name, &args.city)
            .await?
        else {
            warn!(
                company = args.company_name.as_str(),
                city = args.city.as_str(),
                "No company URL found"
            );
            return Ok(vec![]);
        };

        let profile = if args.fetch_profile {
            info!(url = url.as_str(), "Fetching profile data");
            self.fetch_profile(&url).await?
        } else {
            None
        };

        let posts = if args.fetch_posts {
            info!(url = url.as_str(), "Fetching recent posts");
            self.fetch_posts(&url).await?.unwrap_or_default()
        } else {
            placeholder_posts()
        };

        Ok(events_from_posts(posts, profile))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Value {
        json!({
            "api_url": "https://api.provider.example/v2/",
            "api_key": "key-123",
            "session_cookie": "cookie-456",
            "agents": {
                "url_finder_id": "agent-url",
                "company_scraper_id": "agent-profile",
                "activity_extractor_id": "agent-posts"
            }
        })
    }

    fn parse(config: Value) -> Result<LinkedInConfig> {
        let mut parsed: LinkedInConfig = serde_json::from_value(config)?;
        parsed.validate()?;
        Ok(parsed)
    }

    #[test]
    fn valid_config_is_normalized() {
        let config = parse(valid_config()).unwrap();
        // Trailing slash trimmed so endpoint joins stay clean.
        assert_eq!(config.api_url, "https://api.provider.example/v2");
        assert_eq!(config.number_max_of_posts, 3);
        assert_eq!(config.rate_limit.max_calls_per_hour, 10);
    }

    #[test]
    fn http_api_url_is_rejected() {
        let mut config = valid_config();
        config["api_url"] = json!("http://api.provider.example");
        assert!(parse(config).is_err());
    }

    #[test]
    fn blank_session_cookie_is_rejected() {
        let mut config = valid_config();
        config["session_cookie"] = json!("   ");
        assert!(parse(config).is_err());
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let mut config = valid_config();
        config["surprise"] = json!(true);
        assert!(parse(config).is_err());
    }

    #[test]
    fn placeholder_posts_preserve_compat_shape() {
        let posts = placeholder_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author.as_deref(), Some("No posts found"));
        assert_eq!(posts[0].post_content.as_deref(), Some("No posts found"));
        assert_eq!(posts[0].post_url.as_deref(), Some("No posts found"));
    }

    #[test]
    fn events_carry_profile_and_parsed_timestamps() {
        let mut profile = Map::new();
        profile.insert("companyName".to_string(), json!("Acme"));

        let posts = vec![CompanyPost {
            author: Some("Acme".to_string()),
            post_content: Some("We shipped a thing".to_string()),
            post_url: Some("https://example.com/p/1".to_string()),
            post_timestamp: Some("2025-06-01T09:30:00Z".to_string()),
        }];

        let events = events_from_posts(posts, Some(profile));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "linkedin");
        assert_eq!(events[0].source_type, "company news");
        assert!(events[0].published_at.is_some());
        assert!(events[0].profile_data.as_ref().unwrap().contains_key("companyName"));
    }

    #[test]
    fn bad_timestamp_degrades_to_none() {
        let posts = vec![CompanyPost {
            author: None,
            post_content: None,
            post_url: None,
            post_timestamp: Some("yesterday-ish".to_string()),
        }];
        let events = events_from_posts(posts, None);
        assert!(events[0].published_at.is_none());
    }
}
