use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized unit of scraped content or profile data. Every plugin
/// converts its native payloads into this before handing them downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Origin tag: "linkedin", "rss", ...
    pub source: String,
    /// Category: "company news", "sectorial news", ...
    pub source_type: String,

    // Text content (posts, articles)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    // Structured profile fields, when the source yields them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_data: Option<Map<String, Value>>,
}

/// Arguments for one pipeline run, shared by every plugin's `fetch`.
#[derive(Debug, Clone, Default)]
pub struct FetchArgs {
    pub company_name: String,
    pub city: String,
    pub fetch_posts: bool,
    pub fetch_profile: bool,
}

impl FetchArgs {
    pub fn new(company_name: &str, city: &str) -> Self {
        Self {
            company_name: company_name.to_string(),
            city: city.to_string(),
            fetch_posts: true,
            fetch_profile: true,
        }
    }
}
