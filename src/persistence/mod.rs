//! Moving the state file to and from durable storage between runs.

pub mod artifact;
mod github;
mod r2;

use std::path::Path;
use tracing::info;

use crate::environment::BackendSettings;
use crate::TARGET_PERSIST;

pub use self::artifact::{
    latest_snapshot, snapshot_tag, snapshot_title, ArtifactPersister, Attachment, RemoteStore,
    Snapshot, UploadTarget, SNAPSHOT_TAG_PREFIX,
};
pub use self::github::GithubReleases;
pub use self::r2::R2Bucket;
use crate::error::PipelineError;

#[allow(async_fn_in_trait)]
pub trait StatePersistence {
    /// Brings the previous run's state file to `path`, if there is one.
    /// Failures are logged and absorbed: a cold start is always acceptable.
    async fn restore(&self, path: &Path);

    /// Stores the file at `path` durably. Failure must reach the caller, since
    /// the next run would otherwise republish everything recorded since.
    async fn persist(&self, path: &Path) -> Result<(), PipelineError>;
}

/// The backend chosen for this run.
pub enum Persister {
    /// Nothing survives the run.
    NoOp,
    Github(ArtifactPersister<GithubReleases>),
    Bucket(ArtifactPersister<R2Bucket>),
}

impl Persister {
    pub fn from_settings(settings: &BackendSettings, client: reqwest::Client) -> Self {
        match settings {
            BackendSettings::None => Persister::NoOp,
            BackendSettings::Github(github) => {
                Persister::Github(ArtifactPersister::new(GithubReleases::new(client, github)))
            }
            BackendSettings::R2(r2) => Persister::Bucket(ArtifactPersister::new(R2Bucket::new(r2))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Persister::NoOp => "none",
            Persister::Github(_) => "github-releases",
            Persister::Bucket(_) => "r2-bucket",
        }
    }
}

impl StatePersistence for Persister {
    async fn restore(&self, path: &Path) {
        match self {
            Persister::NoOp => {
                info!(target: TARGET_PERSIST, "No persistence backend configured; state starts empty");
            }
            Persister::Github(p) => p.restore(path).await,
            Persister::Bucket(p) => p.restore(path).await,
        }
    }

    async fn persist(&self, path: &Path) -> Result<(), PipelineError> {
        match self {
            Persister::NoOp => {
                info!(target: TARGET_PERSIST, "No persistence backend configured; state of this run is discarded");
                Ok(())
            }
            Persister::Github(p) => p.persist(path).await,
            Persister::Bucket(p) => p.persist(path).await,
        }
    }
}
