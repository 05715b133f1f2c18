//! Type definitions for the RSS module.

use chrono::{DateTime, Utc};
use tokio::time::Duration;

/// Media attached to a feed item, usually a thumbnail image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub media_alt: Option<String>,
}

/// One parsed feed entry. Transient: only `guid` is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub enclosure: Option<Enclosure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

// Constants
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
pub const MAX_RETRIES: usize = 3;
