//! Run configuration, read once from the process environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_DATABASE_PATH: &str = "database.db";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;
pub const DEFAULT_MOZJPEG_PATH: &str = "cjpeg";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_BSKY_SERVICE: &str = "https://bsky.social";
pub const DEFAULT_R2_PREFIX: &str = "snapshots";

/// What to do with feed items that carry no guid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuidPolicy {
    /// Never publish or track them.
    Skip,
    /// Use the item's link as its dedup key.
    FallbackToLink,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GithubSettings {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub api_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct R2Settings {
    pub bucket: String,
    pub endpoint_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub prefix: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendSettings {
    None,
    Github(GithubSettings),
    R2(R2Settings),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlueskySettings {
    pub identifier: String,
    pub password: String,
    pub service: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompressorSettings {
    Cjpegli(PathBuf),
    Mozjpeg(PathBuf),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub feed_url: String,
    pub database_path: PathBuf,
    pub backend: BackendSettings,
    pub bluesky: Option<BlueskySettings>,
    pub compressor: CompressorSettings,
    pub jpeg_quality: u8,
    pub guid_policy: GuidPolicy,
    pub request_timeout: Duration,
    pub compressor_timeout: Duration,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let feed_url = require("FEED_URL")?;
        if !crate::rss::is_valid_url(&feed_url) {
            return Err(ConfigError::Invalid {
                name: "FEED_URL",
                value: feed_url,
                reason: "expected an http or https URL".to_string(),
            });
        }

        let database_path =
            PathBuf::from(get("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.into()));

        let backend_name = get("STATE_BACKEND").unwrap_or_else(|| {
            if get("USE_ACTIONS").is_some() {
                "github".to_string()
            } else {
                "none".to_string()
            }
        });
        let backend = match backend_name.to_lowercase().as_str() {
            "none" | "noop" => BackendSettings::None,
            "github" => {
                let repository = require("GITHUB_REPOSITORY")?;
                let (owner, repo) = split_repository(&repository)?;
                BackendSettings::Github(GithubSettings {
                    token: require("GITHUB_TOKEN")?,
                    owner,
                    repo,
                    api_url: get("GITHUB_API_URL")
                        .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.into())
                        .trim_end_matches('/')
                        .to_string(),
                })
            }
            "r2" | "s3" => BackendSettings::R2(R2Settings {
                bucket: require("R2_BUCKET_NAME")?,
                endpoint_url: require("R2_ENDPOINT_URL")?,
                access_key: require("R2_ACCESS_KEY_ID")?,
                secret_key: require("R2_SECRET_ACCESS_KEY")?,
                prefix: get("R2_PREFIX")
                    .unwrap_or_else(|| DEFAULT_R2_PREFIX.into())
                    .trim_matches('/')
                    .to_string(),
            }),
            _ => {
                return Err(ConfigError::Invalid {
                    name: "STATE_BACKEND",
                    value: backend_name,
                    reason: "expected one of none, github, r2".to_string(),
                })
            }
        };

        let bluesky = match (get("BSKY_USERNAME"), get("BSKY_PASSWORD")) {
            (Some(identifier), Some(password)) => Some(BlueskySettings {
                identifier,
                password,
                service: get("BSKY_SERVICE")
                    .unwrap_or_else(|| DEFAULT_BSKY_SERVICE.into())
                    .trim_end_matches('/')
                    .to_string(),
            }),
            (Some(_), None) => return Err(ConfigError::Missing("BSKY_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("BSKY_USERNAME")),
            (None, None) => None,
        };

        let compressor = match get("CJPEGLI_PATH") {
            Some(path) => CompressorSettings::Cjpegli(PathBuf::from(path)),
            None => CompressorSettings::Mozjpeg(PathBuf::from(
                get("MOZJPEG_PATH").unwrap_or_else(|| DEFAULT_MOZJPEG_PATH.into()),
            )),
        };

        let jpeg_quality = match get("JPEG_QUALITY") {
            Some(raw) => match raw.parse::<u8>() {
                Ok(q) if (1..=100).contains(&q) => q,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "JPEG_QUALITY",
                        value: raw,
                        reason: "expected an integer between 1 and 100".to_string(),
                    })
                }
            },
            None => DEFAULT_JPEG_QUALITY,
        };

        let guid_policy = match get("GUID_FALLBACK").as_deref().map(str::to_lowercase) {
            None => GuidPolicy::Skip,
            Some(v) if v == "skip" => GuidPolicy::Skip,
            Some(v) if v == "link" => GuidPolicy::FallbackToLink,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    name: "GUID_FALLBACK",
                    value: v,
                    reason: "expected skip or link".to_string(),
                })
            }
        };

        Ok(Config {
            feed_url,
            database_path,
            backend,
            bluesky,
            compressor,
            jpeg_quality,
            guid_policy,
            request_timeout: secs_var(&get, "REQUEST_TIMEOUT_SECS", 30)?,
            compressor_timeout: secs_var(&get, "COMPRESSOR_TIMEOUT_SECS", 120)?,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn secs_var<G>(get: &G, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid {
                name,
                value: raw,
                reason: "expected a positive number of seconds".to_string(),
            }),
        },
    }
}

fn split_repository(repository: &str) -> Result<(String, String), ConfigError> {
    match repository.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(ConfigError::Invalid {
            name: "GITHUB_REPOSITORY",
            value: repository.to_string(),
            reason: "expected owner/repo".to_string(),
        }),
    }
}
