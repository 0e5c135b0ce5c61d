use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Launch payload: which agent to run and its provider-side arguments.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchRequest {
    pub id: String,
    pub arguments: Value,
}

/// Response to a launch request.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchResponse {
    #[serde(rename = "containerId")]
    pub container_id: Option<String>,
}

/// Output-endpoint payload. `output` is the agent's console log; a result
/// document URL is pattern-matched out of it once the run completes.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentOutput {
    pub output: Option<String>,
}

/// One row of a company-URL-finder result set.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyUrlRow {
    #[serde(rename = "linkedinUrl")]
    pub linkedin_url: Option<String>,
}

/// A single company post from an activity-extractor result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyPost {
    pub author: Option<String>,
    #[serde(rename = "postContent")]
    pub post_content: Option<String>,
    #[serde(rename = "postUrl")]
    pub post_url: Option<String>,
    #[serde(rename = "postTimestamp")]
    pub post_timestamp: Option<String>,
}
