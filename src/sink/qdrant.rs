//! Qdrant REST client for the live sink.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::json;

use super::{CollectionSpec, UpsertPoint, VectorStore};

/// Blocking client for a Qdrant instance.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    wait: bool,
}

impl QdrantStore {
    /// # Arguments
    /// * `base_url` - e.g. `http://localhost:6333`
    /// * `api_key` - Value for the `api-key` header, if the cluster needs one
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
        wait: bool,
    ) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Qdrant endpoint must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                "api-key",
                HeaderValue::from_str(key.trim()).context("invalid Qdrant API key")?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Qdrant HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            wait,
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }
}

impl VectorStore for QdrantStore {
    fn collection_exists(&self, name: &str) -> Result<bool> {
        let resp = self.client.get(self.collection_url(name)).send()?;
        let status = resp.status();
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => bail!(
                "qdrant collection lookup failed ({}): {}",
                other,
                resp.text().unwrap_or_default()
            ),
        }
    }

    fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let body = json!({
            "vectors": {
                spec.vector_name.as_str(): {
                    "size": spec.dim,
                    "distance": "Cosine"
                }
            },
            "hnsw_config": {
                "m": spec.hnsw_m,
                "ef_construct": spec.hnsw_ef_construct
            }
        });
        let resp = self
            .client
            .put(self.collection_url(&spec.name))
            .json(&body)
            .send()?;
        let status = resp.status();
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            // created concurrently by someone else
            StatusCode::CONFLICT => Ok(()),
            other => bail!(
                "qdrant collection error ({}): {}",
                other,
                resp.text().unwrap_or_default()
            ),
        }
    }

    fn upsert(&self, collection: &str, points: &[UpsertPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let url = format!("{}/points", self.collection_url(collection));
        let body = json!({ "points": points });
        let resp = self
            .client
            .put(url)
            .query(&[("wait", self.wait)])
            .json(&body)
            .send()?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            bail!(
                "qdrant upsert failed ({}): {}",
                status,
                resp.text().unwrap_or_default()
            );
        }
    }
}
