//! Feed retrieval: one HTTP fetch with bounded retries, then parsing.

use reqwest::header;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::parser::parse_feed;
use super::types::{ParsedFeed, MAX_RETRIES, RETRY_DELAY};
use crate::error::PipelineError;
use crate::TARGET_WEB_REQUEST;

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/feed+json, application/xml;q=0.9, */*;q=0.8";

/// Anything that can produce the run's feed.
#[allow(async_fn_in_trait)]
pub trait FeedSource {
    async fn fetch(&self) -> Result<ParsedFeed, PipelineError>;
}

pub struct FeedFetcher {
    client: reqwest::Client,
    url: String,
    max_retries: usize,
    retry_delay: Duration,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        FeedFetcher {
            client,
            url: url.into(),
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, max_retries: usize, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn fetch_body(&self) -> Result<Vec<u8>, PipelineError> {
        let response = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, FEED_ACCEPT)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    PipelineError::transient(&self.url, "request timed out")
                } else {
                    PipelineError::transient(&self.url, err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::transient(
                &self.url,
                format!("non-success status {}", status),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| PipelineError::transient(&self.url, err))?;
        debug!(target: TARGET_WEB_REQUEST, "Received {} bytes from {}", bytes.len(), self.url);
        Ok(bytes.to_vec())
    }
}

impl FeedSource for FeedFetcher {
    async fn fetch(&self) -> Result<ParsedFeed, PipelineError> {
        let mut attempts = 0;

        let body = loop {
            attempts += 1;
            info!(target: TARGET_WEB_REQUEST, "Loading feed from {} (attempt {}/{})", self.url, attempts, self.max_retries);

            match self.fetch_body().await {
                Ok(body) => break body,
                Err(err) if err.is_transient() && attempts < self.max_retries => {
                    warn!(target: TARGET_WEB_REQUEST, "{}; retrying in {:?}", err, self.retry_delay);
                    sleep(self.retry_delay).await;
                }
                Err(err) => {
                    error!(target: TARGET_WEB_REQUEST, "Giving up on {} after {} attempts: {}", self.url, attempts, err);
                    return Err(err);
                }
            }
        };

        // A malformed document will not improve on retry.
        parse_feed(&body)
    }
}
