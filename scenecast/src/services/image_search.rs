//! Image search and raw byte fetch over HTTP.

use super::{ImageSearch, MediaFetcher};
use crate::errors::StageError;
use async_trait::async_trait;
use serde::Deserialize;

/// Image search client for a SerpAPI-style JSON endpoint.
pub struct SerpImageSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    images_results: Vec<ImageResult>,
}

#[derive(Debug, Deserialize)]
struct ImageResult {
    #[serde(default)]
    original: Option<String>,
}

impl SerpImageSearch {
    /// Creates a client against the given search endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ImageSearch for SerpImageSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>, StageError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("tbm", "isch"), ("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| StageError::network(format!("image search failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(StageError::quota(format!(
                "image search quota/auth failure ({status})"
            )));
        }
        if !status.is_success() {
            return Err(StageError::remote_api(format!(
                "image search error ({status})"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StageError::format(format!("image search response did not parse: {e}")))?;

        Ok(parsed
            .images_results
            .into_iter()
            .filter_map(|r| r.original)
            .collect())
    }
}

/// Plain HTTP byte fetcher.
pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl Default for HttpMediaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMediaFetcher {
    /// Creates a fetcher with its own client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StageError::network(format!("fetch of {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::remote_api(format!(
                "fetch of {url} returned {status}"
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| StageError::network(format!("fetch of {url} aborted: {e}")))
    }
}
