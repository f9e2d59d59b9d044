//! Photo search against a Pexels-compatible API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::errors::{Error, Result};

/// Response body of the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub photos: Vec<PhotoRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_results: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub photographer: String,
    pub photographer_url: String,
    /// Alt text, used to derive the artifact base name
    #[serde(default)]
    pub alt: String,
    pub src: PhotoSources,
}

/// Image URLs by size. Only `original` is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoSources {
    pub original: String,
    #[serde(flatten)]
    pub variants: BTreeMap<String, String>,
}

/// Searches the photo API for images of a subject.
#[async_trait]
pub trait PhotoSearch: Send + Sync {
    async fn search(&self, subject: &str, count: u32) -> Result<SearchResult>;
}

/// Search client for the Pexels v1 API. The API key is sent raw in the `Authorization` header.
pub struct PexelsClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl PexelsClient {
    pub fn new(client: Client, base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// `<base>/search?query=<subject>&per_page=<count>`
    pub fn search_url(&self, subject: &str, count: u32) -> Result<Url> {
        let mut url = ensure_slash(&self.base_url).join("search").map_err(|e| Error::Config {
            message: format!("Failed to construct search URL from {}: {}", self.base_url, e),
        })?;
        url.query_pairs_mut()
            .append_pair("query", subject)
            .append_pair("per_page", &count.to_string());
        Ok(url)
    }
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

#[async_trait]
impl PhotoSearch for PexelsClient {
    #[instrument(skip(self), err)]
    async fn search(&self, subject: &str, count: u32) -> Result<SearchResult> {
        let url = self.search_url(subject, count)?;
        debug!("Searching photos at {}", url);

        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Search {
                message: format!("request to {url} failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, "Photo search request was rejected");
            return Err(Error::Search {
                message: format!("API error {status}: {body}"),
            });
        }

        let body_text = response.text().await.map_err(|e| Error::Search {
            message: format!("failed to read response body: {e}"),
        })?;
        debug!("Search response body: {}", body_text);

        match serde_json::from_str::<SearchResult>(&body_text) {
            Ok(parsed) => {
                debug!(photos = parsed.photos.len(), total_results = ?parsed.total_results, "Parsed search results");
                Ok(parsed)
            }
            Err(e) => {
                tracing::error!("Failed to parse search response as JSON. Error: {}", e);
                Err(Error::Search {
                    message: format!("error decoding response body: {e}"),
                })
            }
        }
    }
}
