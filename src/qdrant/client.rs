//! Qdrant-backed [`VectorStore`] speaking the REST API.

use crate::indexing::store::{EmbeddedChunk, VectorStore, distinct_sources};
use crate::indexing::{Chunk, ScoredChunk, VectorStoreError};
use crate::qdrant::types::{ChunkPayload, CountResponse, QueryResponse, QueryResponseResult};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

/// Lightweight HTTP client storing chunks as Qdrant points.
pub struct QdrantStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantStore {
    /// Build a client for the Qdrant instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, VectorStoreError> {
        let client = Client::builder().user_agent("docrag/qdrant").build()?;
        let base_url = url.trim_end_matches('/').to_string();
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = VectorStoreError::UnexpectedStatus { status, body };
                tracing::error!(collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn create_collection(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<(), VectorStoreError> {
        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))
            .json(&json!({
                "vectors": {
                    "size": vector_size,
                    "distance": "Cosine"
                }
            }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection, vector_size, "Collection created");
        })
        .await
    }

    async fn delete_sources(
        &self,
        collection: &str,
        sources: &[String],
    ) -> Result<(), VectorStoreError> {
        if sources.is_empty() {
            return Ok(());
        }
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "source", "match": { "any": sources } }
                    ]
                }
            }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection, sources = sources.len(), "Previous source points removed");
        })
        .await
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn insert(
        &self,
        collection: &str,
        records: Vec<EmbeddedChunk>,
    ) -> Result<usize, VectorStoreError> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        if !self.collection_exists(collection).await? {
            self.create_collection(collection, first.vector.len()).await?;
        }
        self.delete_sources(collection, &distinct_sources(&records))
            .await?;

        let points: Vec<_> = records
            .into_iter()
            .map(|record| {
                let EmbeddedChunk { chunk, vector } = record;
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": ChunkPayload {
                        text: chunk.text,
                        metadata: chunk.metadata,
                    },
                })
            })
            .collect();
        let point_count = points.len();

        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection, points = point_count, "Points indexed");
        })
        .await?;
        Ok(point_count)
    }

    async fn open(&self, collection: &str) -> Result<bool, VectorStoreError> {
        if !self.collection_exists(collection).await? {
            return Ok(false);
        }
        Ok(self.count(collection).await? > 0)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/query"),
            )
            .json(&json!({
                "query": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VectorStoreError::MissingCollection(collection.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut results = Vec::with_capacity(points.len());
        for point in points {
            let Some(payload) = point.payload else {
                continue;
            };
            match serde_json::from_value::<ChunkPayload>(payload) {
                Ok(ChunkPayload { text, metadata }) => results.push(ScoredChunk {
                    chunk: Chunk { text, metadata },
                    score: point.score,
                }),
                Err(error) => {
                    tracing::warn!(collection, %error, "Skipping point with unexpected payload");
                }
            }
        }
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<usize, VectorStoreError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/count"),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::UnexpectedStatus { status, body });
        }
        let CountResponse { result } = response.json().await?;
        Ok(result.count)
    }
}
