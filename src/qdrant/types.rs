//! Wire types for the Qdrant REST API.

use crate::indexing::ChunkMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload stored alongside each point: chunk text plus flattened metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChunkPayload {
    pub(crate) text: String,
    #[serde(flatten)]
    pub(crate) metadata: ChunkMetadata,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct CountResponse {
    pub(crate) result: CountResult,
}

#[derive(Deserialize)]
pub(crate) struct CountResult {
    pub(crate) count: usize,
}
