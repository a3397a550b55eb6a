#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Unreadable response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("No API key configured: set {0}")]
    MissingCredentials(String),

    #[error("Invalid scenario '{id}': {reason}")]
    InvalidScenario { id: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl HarnessError {
    /// Whether the client should spend its retry on this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarnessError::Transport { .. } => true,
            HarnessError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
