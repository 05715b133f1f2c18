//! An S3-compatible bucket (Cloudflare R2 by default) as a snapshot store.
//!
//! A snapshot is the key prefix `<prefix>/<tag>/`; its attachments are the
//! objects directly below it.

use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, Config};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use super::artifact::{Attachment, RemoteStore, Snapshot, UploadTarget};
use crate::environment::R2Settings;
use crate::error::PipelineError;
use crate::TARGET_PERSIST;

pub struct R2Bucket {
    client: Client,
    bucket: String,
    prefix: String,
}

impl R2Bucket {
    pub fn new(settings: &R2Settings) -> Self {
        let creds = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "feedrelay",
        );
        let config = Config::builder()
            .region(Region::new("auto"))
            .endpoint_url(&settings.endpoint_url)
            .credentials_provider(creds)
            .force_path_style(true)
            .behavior_version(BehaviorVersion::latest())
            .build();

        R2Bucket {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
            prefix: settings.prefix.clone(),
        }
    }

    fn snapshot_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

/// Groups object keys under `prefix` into snapshots, oldest tag first.
pub(crate) fn group_objects(
    prefix: &str,
    objects: impl IntoIterator<Item = (String, Option<DateTime<Utc>>)>,
) -> Vec<Snapshot> {
    let mut by_tag: BTreeMap<String, Snapshot> = BTreeMap::new();

    for (key, modified) in objects {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let Some((tag, name)) = rest.split_once('/') else {
            continue;
        };
        if tag.is_empty() || name.is_empty() || name.contains('/') {
            continue;
        }

        let snapshot = by_tag.entry(tag.to_string()).or_insert_with(|| Snapshot {
            tag: tag.to_string(),
            created_at: None,
            attachments: Vec::new(),
        });
        snapshot.created_at = snapshot.created_at.max(modified);
        snapshot.attachments.push(Attachment {
            name: name.to_string(),
            location: key.clone(),
        });
    }

    by_tag.into_values().collect()
}

impl RemoteStore for R2Bucket {
    fn describe(&self) -> String {
        format!("bucket {}/{}", self.bucket, self.prefix)
    }

    async fn list_snapshots(&self, limit: usize) -> Result<Vec<Snapshot>, PipelineError> {
        let prefix = self.snapshot_prefix();
        let mut objects = Vec::new();

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                PipelineError::Persistence(format!("Listing {} failed: {}", self.describe(), e))
            })?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let modified = object
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
                objects.push((key.to_string(), modified));
            }
        }
        debug!(target: TARGET_PERSIST, "Found {} objects under {}", objects.len(), prefix);

        let snapshots = group_objects(&prefix, objects);
        let skip = snapshots.len().saturating_sub(limit);
        Ok(snapshots.into_iter().skip(skip).collect())
    }

    async fn create_snapshot(&self, tag: &str, title: &str) -> Result<UploadTarget, PipelineError> {
        // Prefixes need no creation; the first upload brings the snapshot into being.
        debug!(target: TARGET_PERSIST, "{}", title);
        Ok(UploadTarget(format!("{}{}", self.snapshot_prefix(), tag)))
    }

    async fn upload_attachment(
        &self,
        target: &UploadTarget,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let key = format!("{}/{}", target.0, name);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("Upload of {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PipelineError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&attachment.location)
            .send()
            .await
            .map_err(|e| PipelineError::transient(&attachment.location, e))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::transient(&attachment.location, e))?;
        Ok(data.into_bytes().to_vec())
    }
}
