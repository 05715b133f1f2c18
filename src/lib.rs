pub mod db;
pub mod environment;
pub mod error;
pub mod logging;
pub mod media;
pub mod persistence;
pub mod pipeline;
pub mod publish;
pub mod rss;

#[cfg(test)]
mod test_support;

pub use error::{ConfigError, PipelineError};

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_PERSIST: &str = "persist";
pub const TARGET_MEDIA: &str = "media";
