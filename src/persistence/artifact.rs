//! State persistence through versioned snapshots in a remote store.
//!
//! Each persist creates a fresh snapshot tagged with the current UTC time and
//! attaches the state file to it, so snapshots never collide and old ones stay
//! around as history. Restore reads the newest snapshot back.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use tracing::{info, instrument, warn};

use super::StatePersistence;
use crate::error::PipelineError;
use crate::TARGET_PERSIST;

pub const SNAPSHOT_TAG_PREFIX: &str = "database-";
/// Every SQLite database file starts with these 16 bytes.
pub const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";
const DEFAULT_LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    /// Store-specific handle: an asset URL or an object key.
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub tag: String,
    pub created_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

/// Where a freshly created snapshot accepts its attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget(pub String);

/// The operations a remote store must offer to hold snapshots.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    fn describe(&self) -> String;

    /// Most recent snapshots, up to `limit`. Order is not relied upon.
    async fn list_snapshots(&self, limit: usize) -> Result<Vec<Snapshot>, PipelineError>;

    async fn create_snapshot(&self, tag: &str, title: &str)
        -> Result<UploadTarget, PipelineError>;

    async fn upload_attachment(
        &self,
        target: &UploadTarget,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), PipelineError>;

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PipelineError>;
}

pub struct ArtifactPersister<S> {
    store: S,
    list_limit: usize,
}

impl<S: RemoteStore> ArtifactPersister<S> {
    pub fn new(store: S) -> Self {
        ArtifactPersister {
            store,
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Newest snapshot by creation time; equal times fall back to the
/// lexicographically greatest tag.
pub fn latest_snapshot(snapshots: &[Snapshot]) -> Option<&Snapshot> {
    snapshots
        .iter()
        .filter(|s| s.tag.starts_with(SNAPSHOT_TAG_PREFIX))
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tag.cmp(&b.tag))
        })
}

/// `database-2024-10-01T10-00-00.000Z`: ISO 8601 with `:` made tag-safe.
pub fn snapshot_tag(at: DateTime<Utc>) -> String {
    format!(
        "{}{}",
        SNAPSHOT_TAG_PREFIX,
        at.to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-")
    )
}

pub fn snapshot_title(at: DateTime<Utc>) -> String {
    format!("Persisting database at {}", at.format("%a, %d %b %Y %H:%M:%S GMT"))
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

impl<S: RemoteStore> ArtifactPersister<S> {
    async fn try_restore(&self, path: &Path) -> Result<bool, PipelineError> {
        let name = file_name(path).ok_or_else(|| {
            PipelineError::Persistence(format!("{} has no file name", path.display()))
        })?;

        let snapshots = self.store.list_snapshots(self.list_limit).await?;
        let Some(latest) = latest_snapshot(&snapshots) else {
            info!(target: TARGET_PERSIST, "No snapshots in {}; starting cold", self.store.describe());
            return Ok(false);
        };

        let Some(attachment) = latest.attachments.iter().find(|a| a.name == name) else {
            info!(target: TARGET_PERSIST, "Snapshot {} has no attachment named {}", latest.tag, name);
            return Ok(false);
        };

        let bytes = self.store.download_attachment(attachment).await?;
        if !bytes.starts_with(SQLITE_HEADER) {
            warn!(target: TARGET_PERSIST, "Snapshot {} holds {} bytes that are not a SQLite database; ignoring it", latest.tag, bytes.len());
            return Ok(false);
        }

        // Write beside the target and rename so a failure never leaves a torn file.
        let partial = path.with_file_name(format!(".{}.partial", name));
        if let Err(err) = tokio::fs::write(&partial, &bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&partial, path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }

        info!(target: TARGET_PERSIST, "Restored {} ({} bytes) from snapshot {}", name, bytes.len(), latest.tag);
        Ok(true)
    }
}

impl<S: RemoteStore> StatePersistence for ArtifactPersister<S> {
    /// Never fails: a missing or unreadable previous state means a cold start.
    #[instrument(target = "persist", level = "info", skip(self))]
    async fn restore(&self, path: &Path) {
        match self.try_restore(path).await {
            Ok(_) => {}
            Err(err) => {
                warn!(target: TARGET_PERSIST, "Could not restore state from {}: {}", self.store.describe(), err);
            }
        }
    }

    #[instrument(target = "persist", level = "info", skip(self))]
    async fn persist(&self, path: &Path) -> Result<(), PipelineError> {
        let name = file_name(path).ok_or_else(|| {
            PipelineError::Persistence(format!("{} has no file name", path.display()))
        })?;
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            PipelineError::Persistence(format!("Failed to read {}: {}", path.display(), err))
        })?;

        let now = Utc::now();
        let tag = snapshot_tag(now);
        let target = self.store.create_snapshot(&tag, &snapshot_title(now)).await?;
        let size = bytes.len();
        self.store.upload_attachment(&target, &name, bytes).await?;

        info!(target: TARGET_PERSIST, "Persisted {} ({} bytes) as snapshot {} in {}", name, size, tag, self.store.describe());
        Ok(())
    }
}
