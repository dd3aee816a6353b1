//! Indexing and query orchestration.
//!
//! `SearchService` owns its collaborators explicitly (embedder, vector store,
//! optional keyword extractor) so the HTTP layer, the CLI and the tests all go
//! through the same code path.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::SearchConfig,
    dataset::{Region, SignEntry, SignPayload},
    keywords::{parse_keywords, KeywordExtractor},
    semantic::{Embedder, FieldMatch},
    store::{CollectionInfo, Point, SearchHit, SearchRequest, VectorStore},
};

use super::errors::AppError;

/// Outcome of an indexing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub total: u64,
}

/// Parameters shared by both query modes.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: String,
    pub limit: Option<usize>,
    pub region: Option<Region>,
    pub with_scores: bool,
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordHits {
    pub count: usize,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSearchResponse {
    pub input: String,
    pub keywords: Vec<String>,
    pub results: BTreeMap<String, KeywordHits>,
}

pub struct SearchService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    keywords: Option<Arc<dyn KeywordExtractor>>,
    collection: String,
    search: SearchConfig,
    /// Serialises "count, assign ids, upsert" and recreation.
    index_lock: Mutex<()>,
}

impl SearchService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        search: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            keywords: None,
            collection: collection.into(),
            search,
            index_lock: Mutex::new(()),
        }
    }

    pub fn with_keywords(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.keywords = Some(extractor);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn model_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn store_mode(&self) -> &'static str {
        self.store.mode()
    }

    pub fn keywords_enabled(&self) -> bool {
        self.keywords.is_some()
    }

    pub async fn collection_info(&self) -> Result<Option<CollectionInfo>, AppError> {
        Ok(self.store.collection_info(&self.collection).await?)
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, AppError> {
        Ok(self.store.list_collections().await?)
    }

    /// Fail when an existing collection was built with a different vector width
    /// than the configured embedder produces.
    pub async fn check_compatibility(&self) -> Result<(), AppError> {
        if let Some(info) = self.collection_info().await? {
            self.check_dimensions(&info, self.embedder.dimensions())?;
        }
        Ok(())
    }

    fn check_dimensions(&self, info: &CollectionInfo, requested: usize) -> Result<(), AppError> {
        if info.vector_size != requested {
            return Err(AppError::DimensionMismatch {
                collection: self.collection.clone(),
                existing: info.vector_size,
                requested,
            });
        }
        Ok(())
    }

    /// Create the collection if missing; reject it if its width differs.
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), AppError> {
        match self.collection_info().await? {
            Some(info) => self.check_dimensions(&info, dimensions),
            None => {
                log::info!(
                    "collection {:?} not found, creating it with {dimensions} dimensions",
                    self.collection
                );
                Ok(self.store.create_collection(&self.collection, dimensions).await?)
            }
        }
    }

    /// Run the blocking embedder off the async workers.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        let expected = texts.len();
        let embedder = Arc::clone(&self.embedder);
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|err| AppError::Other(err.into()))??;

        if vectors.len() != expected {
            return Err(AppError::Other(anyhow::anyhow!(
                "embedder returned {} vectors for {expected} texts",
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// Embed and store entries, assigning sequential ids after the current count.
    pub async fn index(&self, entries: Vec<SignEntry>) -> Result<IndexReport, AppError> {
        if entries.is_empty() {
            let total = self
                .collection_info()
                .await?
                .map(|info| info.points_count)
                .unwrap_or_default();
            return Ok(IndexReport { indexed: 0, total });
        }

        let texts = entries
            .iter()
            .map(|entry| entry.full_description.clone())
            .collect();
        let vectors = self.embed_batch(texts).await?;

        let dimensions = vectors[0].len();
        if let Some(odd) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(AppError::Other(anyhow::anyhow!(
                "embedder returned vectors of mixed width ({dimensions} and {})",
                odd.len()
            )));
        }

        let _guard = self.index_lock.lock().await;

        self.ensure_collection(dimensions).await?;
        let start = self.store.count(&self.collection).await?;

        let points = entries
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(offset, (entry, vector))| {
                let payload = serde_json::to_value(SignPayload::from(entry))
                    .map_err(|err| AppError::Other(err.into()))?;
                Ok(Point {
                    id: start + offset as u64,
                    vector,
                    payload,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let indexed = points.len();
        self.store.upsert(&self.collection, points).await?;

        let total = start + indexed as u64;
        log::info!(
            "indexed {indexed} points into {:?} (ids {start}..{total})",
            self.collection
        );

        Ok(IndexReport { indexed, total })
    }

    /// Drop and recreate the collection with the embedder's width.
    pub async fn recreate(&self) -> Result<CollectionInfo, AppError> {
        let _guard = self.index_lock.lock().await;

        log::warn!("recreating collection {:?}", self.collection);
        self.store
            .recreate_collection(&self.collection, self.embedder.dimensions())
            .await?;

        self.collection_info()
            .await?
            .ok_or_else(|| AppError::CollectionNotFound(self.collection.clone()))
    }

    fn resolve_limit(&self, limit: Option<usize>) -> Result<usize, AppError> {
        match limit {
            None => Ok(self.search.default_limit),
            Some(0) => Err(AppError::BadRequest("limit must be at least 1".to_string())),
            Some(limit) => Ok(limit.min(self.search.max_limit)),
        }
    }

    fn validate_query(query: &str) -> Result<&str, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::BadRequest("query must not be empty".to_string()));
        }
        Ok(query)
    }

    async fn search_vector(
        &self,
        vector: Vec<f32>,
        limit: usize,
        params: &SearchParams,
    ) -> Result<Vec<Hit>, AppError> {
        let request = SearchRequest {
            vector,
            limit,
            filter: params
                .region
                .map(|region| FieldMatch::new("region", region.display_name())),
            score_threshold: params.score_threshold.or(self.search.score_threshold),
        };

        let hits = self.store.search(&self.collection, request).await?;
        Ok(hits
            .into_iter()
            .map(|SearchHit { id, score, payload }| Hit {
                id,
                score: params.with_scores.then_some(score),
                payload,
            })
            .collect())
    }

    /// Direct mode: embed the query as-is and return its nearest neighbours.
    pub async fn search(&self, params: SearchParams) -> Result<SearchResponse, AppError> {
        let query = Self::validate_query(&params.query)?.to_string();
        let limit = self.resolve_limit(params.limit)?;

        let vector = self
            .embed_batch(vec![query.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Other(anyhow::anyhow!("no query embedding")))?;

        let results = self.search_vector(vector, limit, &params).await?;
        log::debug!("search {query:?} returned {} hits", results.len());

        Ok(SearchResponse {
            query,
            count: results.len(),
            results,
        })
    }

    /// Keyword-assisted mode: one independent search per extracted keyword.
    ///
    /// The input is passed to the extractor untouched and is itself the only
    /// keyword when the extractor yields nothing usable.
    pub async fn keyword_search(
        &self,
        params: SearchParams,
    ) -> Result<KeywordSearchResponse, AppError> {
        let extractor = self.keywords.as_ref().ok_or(AppError::KeywordsDisabled)?;
        Self::validate_query(&params.query)?;
        let input = params.query.clone();
        let limit = self.resolve_limit(params.limit)?;

        let answer = extractor.extract(&input).await?;
        let keywords = parse_keywords(&answer, &input);
        log::debug!("keywords for {input:?}: {keywords:?}");

        let vectors = self.embed_batch(keywords.clone()).await?;

        let mut results = BTreeMap::new();
        for (keyword, vector) in keywords.iter().zip(vectors) {
            let hits = self.search_vector(vector, limit, &params).await?;
            results.insert(
                keyword.clone(),
                KeywordHits {
                    count: hits.len(),
                    hits,
                },
            );
        }

        Ok(KeywordSearchResponse {
            input,
            keywords,
            results,
        })
    }
}
