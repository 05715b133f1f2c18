//! Feed module: fetching, parsing, and selecting unpublished entries.

mod client;
mod dedup;
mod fetcher;
mod parser;
mod types;
mod util;

pub use self::types::*;

pub use self::client::{create_http_client, USER_AGENT};
pub use self::dedup::{filter_unrecorded, select_new};
pub use self::fetcher::{FeedFetcher, FeedSource};
pub use self::parser::{apply_guid_policy, parse_feed};
pub use self::util::{is_valid_url, non_empty};
