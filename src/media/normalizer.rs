//! Fetching enclosure media and shrinking it below the embed size limit.

use reqwest::header;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};

use super::compressor::ImageCompressor;
use crate::error::PipelineError;
use crate::{TARGET_MEDIA, TARGET_WEB_REQUEST};

/// Largest image the downstream platform accepts as an embed thumbnail.
pub const MAX_EMBED_BYTES: usize = 1_000_000;
pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";
const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";
const TEMP_DIR_PREFIX: &str = "feedrelay-image-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMedia {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

pub struct MediaNormalizer {
    client: reqwest::Client,
    compressor: Box<dyn ImageCompressor>,
    quality: u8,
    compressor_timeout: Duration,
    temp_root: PathBuf,
}

impl MediaNormalizer {
    pub fn new(
        client: reqwest::Client,
        compressor: Box<dyn ImageCompressor>,
        quality: u8,
        compressor_timeout: Duration,
    ) -> Self {
        MediaNormalizer {
            client,
            compressor,
            quality,
            compressor_timeout,
            temp_root: std::env::temp_dir(),
        }
    }

    /// Directory under which the per-call scratch directories are created.
    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    #[instrument(target = "media", level = "info", skip(self))]
    pub async fn normalize(&self, uri: &str) -> Result<NormalizedMedia, PipelineError> {
        let (bytes, media_type) = self.fetch(uri).await?;
        self.shrink(bytes, media_type).await
    }

    async fn fetch(&self, uri: &str) -> Result<(Vec<u8>, String), PipelineError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| PipelineError::transient(uri, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::transient(
                uri,
                format!(
                    "{}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            ));
        }

        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::transient(uri, e))?;
        debug!(target: TARGET_WEB_REQUEST, "Fetched {} bytes of {} from {}", bytes.len(), media_type, uri);

        Ok((bytes.to_vec(), media_type))
    }

    /// Passes media at or under the ceiling through untouched and re-encodes
    /// anything larger as JPEG.
    pub async fn shrink(
        &self,
        bytes: Vec<u8>,
        media_type: String,
    ) -> Result<NormalizedMedia, PipelineError> {
        if bytes.len() <= MAX_EMBED_BYTES {
            return Ok(NormalizedMedia { bytes, media_type });
        }

        info!(target: TARGET_MEDIA, "Compressing {} byte image (limit {})", bytes.len(), MAX_EMBED_BYTES);
        let compressed = self.compress(&bytes).await?;
        info!(target: TARGET_MEDIA, "Compressed image from {} to {} bytes", bytes.len(), compressed.len());

        Ok(NormalizedMedia {
            bytes: compressed,
            media_type: JPEG_MEDIA_TYPE.to_string(),
        })
    }

    async fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        // Removed on drop, whichever way this function returns.
        let scratch = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir_in(&self.temp_root)?;
        let input = scratch.path().join("input.jpg");
        let output = scratch.path().join("output.jpg");
        tokio::fs::write(&input, bytes).await?;

        let program = self.compressor.program();
        let mut command = Command::new(program);
        command
            .args(self.compressor.args(&input, &output, self.quality))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let result = match timeout(self.compressor_timeout, command.output()).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                return Err(PipelineError::Compressor {
                    code: None,
                    stderr: format!("failed to start {}: {}", program.display(), err),
                })
            }
            Err(_) => {
                warn!(target: TARGET_MEDIA, "{} timed out; killing it", program.display());
                return Err(PipelineError::CompressorTimeout(self.compressor_timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        if !stdout.trim().is_empty() {
            info!(target: TARGET_MEDIA, "{}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            warn!(target: TARGET_MEDIA, "{}", stderr.trim());
        }

        if !result.status.success() {
            return Err(PipelineError::Compressor {
                code: result.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let compressed = tokio::fs::read(&output).await.map_err(|err| {
            PipelineError::Compressor {
                code: result.status.code(),
                stderr: format!("exited cleanly but produced no output: {}", err),
            }
        })?;

        if let Err(err) = scratch.close() {
            warn!(target: TARGET_MEDIA, "Failed to remove scratch directory: {}", err);
        }
        Ok(compressed)
    }
}
