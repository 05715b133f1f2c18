use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network failure talking to the feed, a media host or the remote store.
    #[error("Transient fetch failure for {url}: {message}")]
    TransientFetch { url: String, message: String },

    #[error("Failed to parse feed: {0}")]
    Parse(String),

    #[error("Compressor exited with code {code:?}: {stderr}")]
    Compressor { code: Option<i32>, stderr: String },

    #[error("Compressor did not finish within {0:?}")]
    CompressorTimeout(Duration),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Entry already recorded: {guid}")]
    Integrity { guid: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn transient(url: &str, message: impl ToString) -> Self {
        PipelineError::TransientFetch {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientFetch { .. })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable {0} is required")]
    Missing(&'static str),

    #[error("Environment variable {name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
