//! Retrieval of source files from the trusted raw-content host.
//!
//! [`FileFetcher::fetch`] is all-or-nothing: every URL is checked against the
//! trusted prefix before any request goes out, fetches then run concurrently,
//! and the first failure aborts the batch. Nothing is retried here.

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::FilesConfig;
use crate::error::GenerationError;
use crate::models::FetchedFile;

#[derive(Clone)]
pub struct FileFetcher {
    client: reqwest::Client,
    trusted_prefix: String,
    max_file_bytes: usize,
}

impl FileFetcher {
    pub fn new(config: &FilesConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &FilesConfig) -> Self {
        Self {
            client,
            trusted_prefix: config.trusted_prefix.clone(),
            max_file_bytes: config.max_file_bytes,
        }
    }

    /// Rejects any URL outside the trusted prefix.
    pub fn validate_url(&self, url: &str) -> Result<(), GenerationError> {
        match url.strip_prefix(&self.trusted_prefix) {
            Some(rest) if !rest.is_empty() && !rest.contains(char::is_whitespace) => Ok(()),
            _ => Err(GenerationError::InvalidInput(format!(
                "file URL must start with {}: {}",
                self.trusted_prefix, url
            ))),
        }
    }

    /// Fetches every URL, returning files in input order.
    pub async fn fetch(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedFile>, GenerationError> {
        for url in urls {
            self.validate_url(url)?;
        }

        let all = try_join_all(urls.iter().map(|url| self.fetch_one(url)));
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            files = all => files,
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<FetchedFile, GenerationError> {
        let fetch_error = |status: Option<u16>, message: String| GenerationError::Fetch {
            url: url.to_string(),
            status,
            message,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(Some(status.as_u16()), format!("HTTP {}", status)));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_file_bytes as u64 {
                return Err(self.too_large(url));
            }
        }

        // Content-Length is optional; enforce the limit while streaming.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_error(Some(status.as_u16()), e.to_string()))?
        {
            if bytes.len() + chunk.len() > self.max_file_bytes {
                return Err(self.too_large(url));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(url, size_bytes = bytes.len(), "fetched file");

        Ok(FetchedFile {
            url: url.to_string(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
            size_bytes: bytes.len(),
        })
    }

    fn too_large(&self, url: &str) -> GenerationError {
        GenerationError::InvalidInput(format!(
            "file exceeds {} bytes: {}",
            self.max_file_bytes, url
        ))
    }
}
