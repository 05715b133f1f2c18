//! Feed parsing for RSS, Atom, and JSON formats.

use feed_rs::model::{Entry, Feed, MediaObject};
use feed_rs::parser;
use std::io::Cursor;
use tracing::{debug, warn};

use super::types::{Enclosure, FeedItem, ParsedFeed};
use super::util::{cleanup_xml, non_empty};
use crate::environment::GuidPolicy;
use crate::error::PipelineError;
use crate::TARGET_WEB_REQUEST;

/// Parses a fetched feed document.
///
/// Entries that carry no identifier of their own come back with `guid: None`;
/// feed-rs would otherwise invent one from the link and title, which is not a
/// key the publisher ever promised to keep stable.
pub fn parse_feed(body: &[u8]) -> Result<ParsedFeed, PipelineError> {
    let feed = match parse_raw(body) {
        Ok(feed) => feed,
        Err(first_err) => {
            let text = String::from_utf8_lossy(body);
            let cleaned = cleanup_xml(&text);
            if !(cleaned.contains("<rss") || cleaned.contains("<feed") || cleaned.contains("<rdf"))
            {
                return Err(PipelineError::Parse(format!(
                    "document is not RSS or Atom: {}",
                    first_err
                )));
            }
            match parse_raw(cleaned.as_bytes()) {
                Ok(feed) => {
                    warn!(target: TARGET_WEB_REQUEST, "Feed parsed only after XML cleanup: {}", first_err);
                    feed
                }
                Err(second_err) => {
                    return Err(PipelineError::Parse(format!(
                        "{} (after cleanup: {})",
                        first_err, second_err
                    )))
                }
            }
        }
    };

    let title = feed.title.as_ref().and_then(|t| non_empty(&t.content));
    let items: Vec<FeedItem> = feed.entries.into_iter().map(feed_item_from_entry).collect();
    debug!(target: TARGET_WEB_REQUEST, "Parsed feed with {} entries", items.len());

    Ok(ParsedFeed { title, items })
}

fn parse_raw(body: &[u8]) -> Result<Feed, feed_rs::parser::ParseFeedError> {
    parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(Cursor::new(body))
}

fn feed_item_from_entry(entry: Entry) -> FeedItem {
    let description = entry
        .summary
        .as_ref()
        .and_then(|s| non_empty(&s.content))
        .or_else(|| {
            entry
                .content
                .as_ref()
                .and_then(|c| c.body.as_deref())
                .and_then(non_empty)
        });

    FeedItem {
        guid: non_empty(&entry.id),
        title: entry.title.as_ref().and_then(|t| non_empty(&t.content)),
        link: entry.links.first().and_then(|l| non_empty(&l.href)),
        description,
        published_at: entry.published.or(entry.updated),
        enclosure: entry.media.iter().find_map(enclosure_from_media),
    }
}

fn enclosure_from_media(media: &MediaObject) -> Option<Enclosure> {
    let url = media
        .content
        .iter()
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| media.thumbnails.first().map(|t| t.image.uri.clone()))
        .and_then(non_empty)?;

    let texts: String = media.texts.iter().map(|t| t.text.content.as_str()).collect();
    let media_alt = non_empty(texts)
        .or_else(|| media.title.as_ref().and_then(|t| non_empty(&t.content)))
        .or_else(|| media.description.as_ref().and_then(|d| non_empty(&d.content)));

    Some(Enclosure { url, media_alt })
}

/// Gives guid-less items a key derived from their link when configured to.
pub fn apply_guid_policy(items: &mut [FeedItem], policy: GuidPolicy) {
    if policy != GuidPolicy::FallbackToLink {
        return;
    }
    for item in items.iter_mut().filter(|i| i.guid.is_none()) {
        item.guid = item.link.clone();
    }
}
