//! Posting to Bluesky through the AT Protocol XRPC endpoints.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::Publish;
use crate::environment::BlueskySettings;
use crate::error::PipelineError;
use crate::media::NormalizedMedia;
use crate::rss::FeedItem;
use crate::TARGET_WEB_REQUEST;

const POST_COLLECTION: &str = "app.bsky.feed.post";
const MAX_POST_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
    handle: String,
}

#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: Value,
}

/// Builds the `app.bsky.feed.post` record for an item.
///
/// Items with a link become an external link card. The card's `thumb` is a
/// bare blob in the `app.bsky.embed.external` lexicon with no alt field, so
/// the enclosure's alt text is dropped there. The rare item without a link is
/// posted as plain text so it can never wedge the queue; its thumb, if any,
/// goes out as an `app.bsky.embed.images` image, which does carry alt text.
pub fn build_post_record(item: &FeedItem, thumb: Option<Value>, now: DateTime<Utc>) -> Value {
    let created_at = item
        .published_at
        .unwrap_or(now)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    match item.link.as_deref() {
        Some(uri) => {
            let mut external = json!({
                "uri": uri,
                "title": item.title.as_deref().unwrap_or(""),
                "description": item.description.as_deref().unwrap_or(""),
            });
            if let Some(thumb) = thumb {
                external["thumb"] = thumb;
            }
            json!({
                "$type": POST_COLLECTION,
                "text": "",
                "createdAt": created_at,
                "embed": {
                    "$type": "app.bsky.embed.external",
                    "external": external,
                },
            })
        }
        None => {
            let mut record = json!({
                "$type": POST_COLLECTION,
                "text": item
                    .title
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(MAX_POST_CHARS)
                    .collect::<String>(),
                "createdAt": created_at,
            });
            if let Some(thumb) = thumb {
                let alt = item
                    .enclosure
                    .as_ref()
                    .and_then(|e| e.media_alt.as_deref())
                    .unwrap_or("");
                record["embed"] = json!({
                    "$type": "app.bsky.embed.images",
                    "images": [{ "image": thumb, "alt": alt }],
                });
            }
            record
        }
    }
}

pub struct BlueskyPublisher {
    client: reqwest::Client,
    service: String,
    session: Session,
}

impl BlueskyPublisher {
    /// Authenticates once; every later call reuses the session.
    pub async fn login(
        client: reqwest::Client,
        settings: &BlueskySettings,
    ) -> Result<Self, PipelineError> {
        let url = format!("{}/xrpc/com.atproto.server.createSession", settings.service);
        let response = client
            .post(&url)
            .json(&json!({
                "identifier": settings.identifier,
                "password": settings.password,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::transient(&url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Publish(format!(
                "login as {} failed with {}: {}",
                settings.identifier, status, body
            )));
        }

        let session: Session = response
            .json()
            .await
            .map_err(|e| PipelineError::Publish(format!("malformed session: {}", e)))?;
        info!(target: TARGET_WEB_REQUEST, "Logged in to {} as {}", settings.service, session.handle);

        Ok(BlueskyPublisher {
            client,
            service: settings.service.clone(),
            session,
        })
    }

    async fn xrpc_post(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PipelineError> {
        let response = request
            .bearer_auth(&self.session.access_jwt)
            .send()
            .await
            .map_err(|e| PipelineError::transient(method, e))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(PipelineError::Publish(format!(
            "{} failed with {}: {}",
            method, status, body
        )))
    }

    async fn upload_blob(&self, media: NormalizedMedia) -> Result<Value, PipelineError> {
        let url = format!("{}/xrpc/com.atproto.repo.uploadBlob", self.service);
        let request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, media.media_type)
            .body(media.bytes);
        let response = self.xrpc_post("uploadBlob", request).await?;

        let uploaded: UploadBlobResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Publish(format!("malformed blob response: {}", e)))?;
        Ok(uploaded.blob)
    }
}

impl Publish for BlueskyPublisher {
    async fn publish(
        &self,
        item: &FeedItem,
        media: Option<NormalizedMedia>,
    ) -> Result<(), PipelineError> {
        let thumb = match media {
            Some(media) => Some(self.upload_blob(media).await?),
            None => None,
        };
        let record = build_post_record(item, thumb, Utc::now());

        let url = format!("{}/xrpc/com.atproto.repo.createRecord", self.service);
        let request = self.client.post(&url).json(&json!({
            "repo": self.session.did,
            "collection": POST_COLLECTION,
            "record": record,
        }));
        let response = self.xrpc_post("createRecord", request).await?;

        let created: Value = response.json().await.unwrap_or(Value::Null);
        debug!(target: TARGET_WEB_REQUEST, "Created post {}", created["uri"]);
        Ok(())
    }
}
