//! One run: restore state, fetch, dedup, publish each new item, persist.

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::db::StateStore;
use crate::environment::GuidPolicy;
use crate::error::PipelineError;
use crate::media::MediaNormalizer;
use crate::persistence::StatePersistence;
use crate::publish::Publish;
use crate::rss::{apply_guid_policy, select_new, FeedItem, FeedSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Restoring,
    Fetching,
    Deduping,
    Publishing(usize),
    Recording(usize),
    Persisting,
    Done,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Idle => write!(f, "idle"),
            RunStage::Restoring => write!(f, "restoring state"),
            RunStage::Fetching => write!(f, "fetching feed"),
            RunStage::Deduping => write!(f, "selecting new items"),
            RunStage::Publishing(i) => write!(f, "publishing item {}", i),
            RunStage::Recording(i) => write!(f, "recording item {}", i),
            RunStage::Persisting => write!(f, "persisting state"),
            RunStage::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub feed_title: Option<String>,
    /// Entries already in the state store when the run began.
    pub known_entries: i64,
    pub fetched: usize,
    pub new_items: usize,
    pub published: usize,
}

#[derive(Debug, Error)]
#[error("run failed while {stage}: {source}")]
pub struct RunError {
    pub stage: RunStage,
    #[source]
    pub source: PipelineError,
    pub report: RunReport,
}

impl RunError {
    fn new(stage: RunStage, source: PipelineError, report: &RunReport) -> Self {
        RunError {
            stage,
            source,
            report: report.clone(),
        }
    }
}

pub struct Pipeline<F, P, B> {
    feed: F,
    publisher: P,
    persister: B,
    media: MediaNormalizer,
    state_path: PathBuf,
    guid_policy: GuidPolicy,
}

impl<F, P, B> Pipeline<F, P, B>
where
    F: FeedSource,
    P: Publish,
    B: StatePersistence,
{
    pub fn new(
        feed: F,
        publisher: P,
        persister: B,
        media: MediaNormalizer,
        state_path: impl Into<PathBuf>,
        guid_policy: GuidPolicy,
    ) -> Self {
        Pipeline {
            feed,
            publisher,
            persister,
            media,
            state_path: state_path.into(),
            guid_policy,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn into_persister(self) -> B {
        self.persister
    }

    /// Runs every stage once. Items are handled strictly in feed order, and a
    /// failing item stops the loop but not the final persist, so everything
    /// recorded before it survives into the next run.
    #[instrument(level = "info", skip(self), fields(state = %self.state_path.display()))]
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        info!("Stage: {}", RunStage::Restoring);
        self.persister.restore(&self.state_path).await;
        let (store, known_entries) = match self.open_state().await {
            Ok(opened) => opened,
            Err(err) => {
                // A damaged state file is set aside and the run starts cold.
                let aside = self.set_aside_state().await;
                warn!("Unusable state file, moved to {}: {}", aside.display(), err);
                self.open_state()
                    .await
                    .map_err(|e| RunError::new(RunStage::Restoring, e, &report))?
            }
        };
        report.known_entries = known_entries;
        info!("State holds {} published entries", report.known_entries);

        info!("Stage: {}", RunStage::Fetching);
        let feed = match self.feed.fetch().await {
            Ok(feed) => feed,
            Err(err) => {
                // Nothing was published, so there is nothing to persist.
                store.close().await;
                return Err(RunError::new(RunStage::Fetching, err, &report));
            }
        };
        report.feed_title = feed.title.clone();
        report.fetched = feed.items.len();
        info!("Fetched {} items from {}", report.fetched, feed.title.as_deref().unwrap_or("untitled feed"));

        info!("Stage: {}", RunStage::Deduping);
        let mut items = feed.items;
        apply_guid_policy(&mut items, self.guid_policy);
        let new_items = match select_new(items, &store).await {
            Ok(new_items) => new_items,
            Err(err) => {
                store.close().await;
                return Err(RunError::new(RunStage::Deduping, err, &report));
            }
        };
        report.new_items = new_items.len();

        let mut item_failure = None;
        for (index, item) in new_items.iter().enumerate() {
            if let Err((stage, err)) = self.process_item(index, item, &store).await {
                error!("Stopping at item {} of {}: {} failed: {}", index + 1, new_items.len(), stage, err);
                item_failure = Some((stage, err));
                break;
            }
            report.published += 1;
        }

        info!("Stage: {}", RunStage::Persisting);
        store.close().await;
        if let Err(err) = self.persister.persist(&self.state_path).await {
            if let Some((stage, item_err)) = &item_failure {
                warn!("Earlier failure at {} is superseded: {}", stage, item_err);
            }
            return Err(RunError::new(RunStage::Persisting, err, &report));
        }

        if let Some((stage, err)) = item_failure {
            return Err(RunError::new(stage, err, &report));
        }

        info!(
            "Stage: {}. Published {} of {} new items",
            RunStage::Done,
            report.published,
            report.new_items
        );
        Ok(report)
    }

    async fn open_state(&self) -> Result<(StateStore, i64), PipelineError> {
        let store = StateStore::open(&self.state_path).await?;
        match store.count().await {
            Ok(count) => Ok((store, count)),
            Err(err) => {
                store.close().await;
                Err(err)
            }
        }
    }

    /// Renames the state file to `<name>.corrupt`, leaving the path free.
    async fn set_aside_state(&self) -> PathBuf {
        let mut aside = self.state_path.clone().into_os_string();
        aside.push(".corrupt");
        let aside = PathBuf::from(aside);
        if let Err(err) = tokio::fs::rename(&self.state_path, &aside).await {
            warn!("Could not move {} aside: {}", self.state_path.display(), err);
            let _ = tokio::fs::remove_file(&self.state_path).await;
        }
        aside
    }

    async fn process_item(
        &self,
        index: usize,
        item: &FeedItem,
        store: &StateStore,
    ) -> Result<(), (RunStage, PipelineError)> {
        let Some(guid) = item.guid.as_deref() else {
            return Ok(());
        };
        info!(
            "{}: {}",
            item.title.as_deref().unwrap_or("(untitled)"),
            item.link.as_deref().unwrap_or("(no link)")
        );

        let publishing = RunStage::Publishing(index);
        let media = match &item.enclosure {
            Some(enclosure) => Some(
                self.media
                    .normalize(&enclosure.url)
                    .await
                    .map_err(|e| (publishing, e))?,
            ),
            None => None,
        };
        self.publisher
            .publish(item, media)
            .await
            .map_err(|e| (publishing, e))?;

        store
            .record(guid)
            .await
            .map_err(|e| (RunStage::Recording(index), e))
    }
}
