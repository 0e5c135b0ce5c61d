pub mod error;
pub mod types;

pub use error::{AutomationError, Result};
pub use types::{AgentOutput, CompanyPost, CompanyUrlRow, LaunchRequest, LaunchResponse};

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Per-request timeout for launch, poll and download calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between output polls.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll budget. 30 attempts at 5s puts a ~150s ceiling on one agent run.
const MAX_POLL_ATTEMPTS: u32 = 30;

const API_KEY_HEADER: &str = "x-api-key";

/// REST client for the browser-automation provider. One logical operation is
/// a launch/poll/download round trip: start an agent run, poll its console
/// output until a result-document URL appears, then download that document.
///
/// Retry policy during polling is deliberately asymmetric: request timeouts
/// are tolerated up to the attempt budget, while any other transport or HTTP
/// failure aborts the run immediately. Whether transient connection resets
/// should also be tolerated is an open product question; until that is
/// settled they stay fatal.
pub struct AutomationClient {
    http: reqwest::Client,
    api_key: String,
    launch_url: String,
    fetch_output_url: String,
}

impl AutomationClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::build(base_url, api_key, false)
    }

    /// Client that skips TLS certificate verification. Some corporate
    /// proxies re-sign provider traffic; callers opt in explicitly.
    pub fn new_insecure(base_url: &str, api_key: &str) -> Self {
        Self::build(base_url, api_key, true)
    }

    fn build(base_url: &str, api_key: &str, insecure_tls: bool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .expect("Failed to build automation HTTP client");

        let base = base_url.trim_end_matches('/');
        Self {
            http,
            api_key: api_key.to_string(),
            launch_url: format!("{base}/agents/launch"),
            fetch_output_url: format!("{base}/agents/fetch-output"),
        }
    }

    /// Start an agent run. Returns the provider's container id for the run.
    pub async fn launch_agent(&self, agent_id: &str, arguments: Value) -> Result<String> {
        let payload = LaunchRequest {
            id: agent_id.to_string(),
            arguments,
        };

        let resp = self
            .http
            .post(&self.launch_url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AutomationError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let launch: LaunchResponse = resp.json().await?;
        launch
            .container_id
            .ok_or(AutomationError::MissingContainerId)
    }

    /// Fetch the agent's current console output.
    pub async fn poll_output(&self, agent_id: &str) -> Result<AgentOutput> {
        let resp = self
            .http
            .get(&self.fetch_output_url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("id", agent_id)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AutomationError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }

    /// Download the result document an agent run produced.
    pub async fn download_result(&self, result_url: &str) -> Result<Value> {
        let resp = self.http.get(result_url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AutomationError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }

    /// Run one agent end-to-end: launch, poll, download.
    ///
    /// Returns `Ok(None)` when the poll budget is exhausted without a result
    /// document. Callers must treat that as "nothing found" — after ~150s of
    /// polling this layer cannot distinguish a slow run from an empty one.
    pub async fn run_agent(&self, agent_id: &str, arguments: Value) -> Result<Option<Value>> {
        let container_id = self.launch_agent(agent_id, arguments).await?;
        info!(agent_id, container_id, "Agent launched, polling for output");

        for attempt in 1..=MAX_POLL_ATTEMPTS {
            match self.poll_output(agent_id).await {
                Ok(out) => {
                    if let Some(result_url) =
                        out.output.as_deref().and_then(result_url_from_output)
                    {
                        info!(agent_id, result_url, "Result located, downloading");
                        match self.download_result(&result_url).await {
                            Ok(doc) => {
                                info!(agent_id, "Result document downloaded");
                                return Ok(Some(doc));
                            }
                            Err(AutomationError::Timeout(e)) => {
                                warn!(agent_id, attempt, error = %e, "Result download timed out, retrying");
                            }
                            Err(e) => return Err(e),
                        }
                    } else {
                        debug!(agent_id, attempt, "No result yet");
                    }
                }
                Err(AutomationError::Timeout(e)) => {
                    warn!(agent_id, attempt, error = %e, "Output poll timed out, retrying");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }

        warn!(agent_id, "Agent run completed without producing a result");
        Ok(None)
    }

    /// Run an agent and deserialize its result document as a row set.
    /// Result documents are JSON arrays of per-line rows.
    pub async fn run_agent_rows<T: DeserializeOwned>(
        &self,
        agent_id: &str,
        arguments: Value,
    ) -> Result<Option<Vec<T>>> {
        match self.run_agent(agent_id, arguments).await? {
            Some(doc) => {
                let rows: Vec<T> = serde_json::from_value(doc)?;
                Ok(Some(rows))
            }
            None => Ok(None),
        }
    }
}

/// Extract the result-document URL from an agent's console output, if the
/// run has finished writing it.
pub fn result_url_from_output(output: &str) -> Option<String> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let re = MARKER.get_or_init(|| {
        Regex::new(r"https://\S+result\.json").expect("Invalid result marker regex")
    });
    re.find(output).map(|m| m.as_str().to_string())
}
