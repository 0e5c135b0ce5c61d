use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutomationError>;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Agent launch did not return a container id")]
    MissingContainerId,
}

impl From<reqwest::Error> for AutomationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AutomationError::Timeout(err.to_string())
        } else {
            AutomationError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(err: serde_json::Error) -> Self {
        AutomationError::Parse(err.to_string())
    }
}
