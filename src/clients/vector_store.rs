//! HTTP client for the vector store

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::VectorHit;
use super::VectorSearchClient;
use crate::config::VectorStoreConfig;
use crate::errors::Result;
use crate::errors::RiksRagError;

/// Queries `{endpoint}/collections/{name}/query` with a precomputed embedding
pub struct HttpVectorSearchClient {
    base: Url,
    client: Client,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    embedding: &'a [f32],
    k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    hits: Vec<VectorHit>,
}

impl HttpVectorSearchClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| RiksRagError::ConfigError(format!("Invalid vector store URL: {e}")))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RiksRagError::HttpError(e.to_string()))?;
        Ok(Self { base, client })
    }

    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        Self::new(&config.endpoint, Duration::from_secs(config.timeout_secs))
    }

    fn query_url(&self, collection: &str) -> Result<Url> {
        self.base
            .join(&format!("collections/{collection}/query"))
            .map_err(|e| RiksRagError::ConfigError(format!("Invalid collection name: {e}")))
    }
}

#[async_trait]
impl VectorSearchClient for HttpVectorSearchClient {
    async fn query(&self, collection: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let url = self.query_url(collection)?;
        debug!("Querying collection {} (k={})", collection, k);

        let response = self
            .client
            .post(url)
            .json(&QueryRequest { embedding, k })
            .send()
            .await
            .map_err(|e| RiksRagError::HttpError(format!("{collection}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RiksRagError::HttpError(format!(
                "{collection} returned {status}: {error_text}"
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| RiksRagError::HttpError(format!("{collection}: bad response: {e}")))?;
        Ok(body.hits)
    }
}
