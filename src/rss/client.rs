//! HTTP client creation shared by every outbound call of a run.

use tokio::time::Duration;
use tracing::debug;

use crate::error::PipelineError;
use crate::TARGET_WEB_REQUEST;

pub const USER_AGENT: &str = concat!("feedrelay/", env!("CARGO_PKG_VERSION"));

/// Builds a client whose every request is bounded by `request_timeout`.
pub fn create_http_client(request_timeout: Duration) -> Result<reqwest::Client, PipelineError> {
    debug!(target: TARGET_WEB_REQUEST, "Creating HTTP client with {:?} timeout", request_timeout);

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .gzip(true)
        .timeout(request_timeout)
        .connect_timeout(request_timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| PipelineError::Client(e.to_string()))
}
