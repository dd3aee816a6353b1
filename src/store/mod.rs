//! Vector store abstraction.
//!
//! The search service only talks to `VectorStore`. Which backend sits behind it
//! is decided once at startup from `StoreConfig`:
//! - `embedded`: in-process cosine index persisted under a data directory
//! - `qdrant`: a remote Qdrant server

mod embedded;
mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::semantic::{FieldMatch, IndexError, VectorStorageError};

pub use embedded::EmbeddedStore;
pub use qdrant::QdrantStore;

/// A vector and its payload, addressed by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub score: f32,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub filter: Option<FieldMatch>,
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Green,
    Yellow,
    Red,
    Grey,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub status: CollectionStatus,
    pub points_count: u64,
    pub vector_size: usize,
    pub distance: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("collection {0:?} does not exist")]
    NotFound(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("qdrant error: {0}")]
    Qdrant(#[from] qdrant_client::QdrantError),

    #[error("vector store error: {0}")]
    Other(String),
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for status output.
    fn mode(&self) -> &'static str;

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Metadata of a collection, `None` when it does not exist.
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError>;

    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    /// Create an empty cosine collection.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<(), StoreError>;

    /// Drop a collection. Dropping a missing collection is not an error.
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Exact number of points in an existing collection.
    async fn count(&self, name: &str) -> Result<u64, StoreError>;

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<(), StoreError>;

    /// Nearest neighbours, best first.
    async fn search(
        &self,
        name: &str,
        request: SearchRequest,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn recreate_collection(&self, name: &str, dimensions: usize) -> Result<(), StoreError> {
        self.delete_collection(name).await?;
        self.create_collection(name, dimensions).await
    }
}
