//! Emitting new items to the downstream feed.

mod bluesky;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::environment::BlueskySettings;
use crate::error::PipelineError;
use crate::media::NormalizedMedia;
use crate::rss::FeedItem;
use crate::TARGET_WEB_REQUEST;

pub use self::bluesky::{build_post_record, BlueskyPublisher};

#[allow(async_fn_in_trait)]
pub trait Publish {
    async fn publish(
        &self,
        item: &FeedItem,
        media: Option<NormalizedMedia>,
    ) -> Result<(), PipelineError>;
}

/// Logs the post it would create instead of sending it.
pub struct DryRunPublisher;

impl Publish for DryRunPublisher {
    async fn publish(
        &self,
        item: &FeedItem,
        media: Option<NormalizedMedia>,
    ) -> Result<(), PipelineError> {
        let thumb = media.map(|m| {
            json!({
                "mimeType": m.media_type,
                "size": m.bytes.len(),
                "alt": item.enclosure.as_ref().and_then(|e| e.media_alt.clone()),
            })
        });
        let record = build_post_record(item, thumb, Utc::now());
        info!(target: TARGET_WEB_REQUEST, "Dry run, would post: {}", record);
        Ok(())
    }
}

pub enum Publisher {
    DryRun(DryRunPublisher),
    Bluesky(BlueskyPublisher),
}

impl Publisher {
    /// Logs in when credentials are configured, otherwise runs dry.
    pub async fn connect(
        client: reqwest::Client,
        settings: Option<&BlueskySettings>,
    ) -> Result<Self, PipelineError> {
        match settings {
            Some(settings) => Ok(Publisher::Bluesky(
                BlueskyPublisher::login(client, settings).await?,
            )),
            None => {
                info!(target: TARGET_WEB_REQUEST, "No publisher credentials configured; running dry");
                Ok(Publisher::DryRun(DryRunPublisher))
            }
        }
    }
}

impl Publish for Publisher {
    async fn publish(
        &self,
        item: &FeedItem,
        media: Option<NormalizedMedia>,
    ) -> Result<(), PipelineError> {
        match self {
            Publisher::DryRun(p) => p.publish(item, media).await,
            Publisher::Bluesky(p) => p.publish(item, media).await,
        }
    }
}
