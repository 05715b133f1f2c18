//! GitHub releases as a snapshot store.
//!
//! Every snapshot is a pre-release whose single asset is the state file.

use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::artifact::{Attachment, RemoteStore, Snapshot, UploadTarget, SNAPSHOT_TAG_PREFIX};
use crate::environment::GithubSettings;
use crate::error::PipelineError;
use crate::TARGET_PERSIST;

const GITHUB_API_VERSION: &str = "2022-11-28";
const GITHUB_JSON: &str = "application/vnd.github+json";
const OCTET_STREAM: &str = "application/octet-stream";
/// GitHub's maximum `per_page`.
const PAGE_SIZE: usize = 100;
/// Releases are scanned at most this many pages deep for snapshot tags.
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    created_at: Option<String>,
    upload_url: Option<String>,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    url: String,
}

impl From<Release> for Snapshot {
    fn from(release: Release) -> Self {
        Snapshot {
            created_at: release
                .created_at
                .as_deref()
                .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                .map(|c| c.with_timezone(&Utc)),
            tag: release.tag_name,
            attachments: release
                .assets
                .into_iter()
                .map(|a| Attachment {
                    name: a.name,
                    location: a.url,
                })
                .collect(),
        }
    }
}

pub struct GithubReleases {
    client: reqwest::Client,
    token: String,
    releases_url: String,
    repository: String,
    page_size: usize,
}

impl GithubReleases {
    pub fn new(client: reqwest::Client, settings: &GithubSettings) -> Self {
        GithubReleases {
            client,
            token: settings.token.clone(),
            releases_url: format!(
                "{}/repos/{}/{}/releases",
                settings.api_url, settings.owner, settings.repo
            ),
            repository: format!("{}/{}", settings.owner, settings.repo),
            page_size: PAGE_SIZE,
        }
    }

    #[cfg(test)]
    fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }
}

/// `upload_url` comes back as an RFC 6570 template (`.../assets{?name,label}`).
pub(crate) fn expand_upload_url(template: &str) -> &str {
    match template.find('{') {
        Some(idx) => &template[..idx],
        None => template,
    }
}

async fn expect_success(
    response: reqwest::Response,
    expected: &[StatusCode],
    what: &str,
) -> Result<reqwest::Response, PipelineError> {
    let status = response.status();
    if expected.contains(&status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PipelineError::Persistence(format!(
        "{} returned {}: {}",
        what,
        status,
        body.chars().take(300).collect::<String>()
    )))
}

impl RemoteStore for GithubReleases {
    fn describe(&self) -> String {
        format!("GitHub releases of {}", self.repository)
    }

    /// Releases come back newest first, mixed with whatever else the
    /// repository publishes, so pages are walked until `limit` snapshot
    /// releases are found or the list runs out.
    async fn list_snapshots(&self, limit: usize) -> Result<Vec<Snapshot>, PipelineError> {
        let mut snapshots = Vec::new();

        for page in 1..=MAX_PAGES {
            let response = self
                .request(reqwest::Method::GET, &self.releases_url)
                .header(header::ACCEPT, GITHUB_JSON)
                .query(&[
                    ("per_page", self.page_size.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .map_err(|e| PipelineError::transient(&self.releases_url, e))?;
            let response = expect_success(response, &[StatusCode::OK], "listing releases").await?;

            let releases: Vec<Release> = response.json().await.map_err(|e| {
                PipelineError::Persistence(format!("Malformed release list: {}", e))
            })?;
            let received = releases.len();
            debug!(target: TARGET_PERSIST, "Listed {} releases of {} (page {})", received, self.repository, page);

            snapshots.extend(
                releases
                    .into_iter()
                    .filter(|r| r.tag_name.starts_with(SNAPSHOT_TAG_PREFIX))
                    .map(Snapshot::from),
            );
            if snapshots.len() >= limit || received < self.page_size {
                break;
            }
        }

        snapshots.truncate(limit);
        Ok(snapshots)
    }

    async fn create_snapshot(&self, tag: &str, title: &str) -> Result<UploadTarget, PipelineError> {
        let response = self
            .request(reqwest::Method::POST, &self.releases_url)
            .header(header::ACCEPT, GITHUB_JSON)
            .json(&json!({
                "tag_name": tag,
                "name": title,
                "draft": false,
                "prerelease": true,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::transient(&self.releases_url, e))?;
        let response = expect_success(
            response,
            &[StatusCode::CREATED, StatusCode::OK],
            "creating release",
        )
        .await?;

        let release: Release = response
            .json()
            .await
            .map_err(|e| PipelineError::Persistence(format!("Malformed release: {}", e)))?;
        let upload_url = release.upload_url.ok_or_else(|| {
            PipelineError::Persistence(format!("Release {} has no upload URL", tag))
        })?;

        Ok(UploadTarget(expand_upload_url(&upload_url).to_string()))
    }

    async fn upload_attachment(
        &self,
        target: &UploadTarget,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let response = self
            .request(reqwest::Method::POST, &target.0)
            .header(header::ACCEPT, GITHUB_JSON)
            .header(header::CONTENT_TYPE, OCTET_STREAM)
            .query(&[("name", name), ("label", name)])
            .body(bytes)
            .send()
            .await
            .map_err(|e| PipelineError::transient(&target.0, e))?;
        expect_success(response, &[StatusCode::CREATED], "uploading asset").await?;
        Ok(())
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PipelineError> {
        // The asset API answers with a redirect to storage; reqwest drops the
        // Authorization header when it crosses hosts.
        let response = self
            .request(reqwest::Method::GET, &attachment.location)
            .header(header::ACCEPT, OCTET_STREAM)
            .send()
            .await
            .map_err(|e| PipelineError::transient(&attachment.location, e))?;
        let response = expect_success(response, &[StatusCode::OK], "downloading asset").await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::transient(&attachment.location, e))?;
        Ok(bytes.to_vec())
    }
}
