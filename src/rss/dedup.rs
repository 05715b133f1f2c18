//! Selecting the feed items that have not been published yet.

use std::collections::HashSet;
use tracing::{debug, info};

use super::types::FeedItem;
use crate::db::StateStore;
use crate::error::PipelineError;
use crate::TARGET_DB;

/// Returns, in feed order, every item with a guid that is not yet recorded.
///
/// Items without a guid can be neither deduplicated nor recorded, so they are
/// left out. A guid repeated within the same feed is only kept the first time.
pub async fn select_new(
    items: Vec<FeedItem>,
    store: &StateStore,
) -> Result<Vec<FeedItem>, PipelineError> {
    let candidates: Vec<&str> = items.iter().filter_map(|i| i.guid.as_deref()).collect();
    let existing = store.contains_any(&candidates).await?;

    let total = items.len();
    let selected = filter_unrecorded(items, &existing);
    info!(target: TARGET_DB, "{} of {} feed items are new", selected.len(), total);
    Ok(selected)
}

/// The pure half of [`select_new`].
pub fn filter_unrecorded(items: Vec<FeedItem>, existing: &HashSet<String>) -> Vec<FeedItem> {
    let mut seen: HashSet<String> = HashSet::new();

    items
        .into_iter()
        .filter(|item| match item.guid.as_deref() {
            None => {
                debug!(target: TARGET_DB, "Skipping item without guid: {:?}", item.link);
                false
            }
            Some(guid) if existing.contains(guid) => false,
            Some(guid) => seen.insert(guid.to_string()),
        })
        .collect()
}
