//! In-memory vector index with cosine similarity search.
//!
//! Stores point embeddings together with their JSON payload and provides
//! similarity search with an optional exact-match payload filter.

use std::collections::HashMap;

use serde_json::Value;

/// An entry in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// Arbitrary JSON payload stored with the vector
    pub payload: Value,
}

/// Exact-match condition on a top-level payload field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub key: String,
    pub value: String,
}

impl FieldMatch {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    fn matches(&self, payload: &Value) -> bool {
        payload
            .get(&self.key)
            .and_then(Value::as_str)
            .map(|v| v == self.value)
            .unwrap_or(false)
    }
}

/// In-memory vector index for one collection.
///
/// Stores embeddings keyed by point ID, supporting:
/// - Insert/update operations
/// - Cosine similarity search with threshold and payload filtering
#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// Point ID -> (embedding, payload)
    entries: HashMap<u64, VectorEntry>,
    /// Expected embedding dimensions
    dimensions: usize,
}

/// Search result from the vector index.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Point ID
    pub id: u64,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
    pub payload: Value,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    /// Get the expected embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace an entry in the index.
    ///
    /// Returns an error if the embedding has the wrong width or zero norm.
    pub fn insert(
        &mut self,
        id: u64,
        embedding: Vec<f32>,
        payload: Value,
    ) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = Self::l2_norm(&embedding);
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(id, VectorEntry { embedding, payload });

        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, id: u64) -> Option<&VectorEntry> {
        self.entries.get(&id)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &VectorEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Search for similar vectors using cosine similarity.
    ///
    /// # Arguments
    /// * `query` - The query embedding vector
    /// * `filter` - Optional payload condition every hit must satisfy
    /// * `threshold` - Optional minimum similarity score
    /// * `limit` - Maximum number of results to return
    ///
    /// # Returns
    /// Results sorted by similarity score (highest first), ties broken by id.
    pub fn search(
        &self,
        query: &[f32],
        filter: Option<&FieldMatch>,
        threshold: Option<f32>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = Self::l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .filter(|(_, entry)| filter.map(|f| f.matches(&entry.payload)).unwrap_or(true))
            .filter_map(|(id, entry)| {
                let score = Self::cosine_similarity(query, &entry.embedding, query_norm);
                if threshold.map(|t| score >= t).unwrap_or(true) {
                    Some((*id, score))
                } else {
                    None
                }
            })
            .map(|(id, score)| SearchResult {
                id,
                score,
                payload: Value::Null,
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        results.truncate(limit);

        // payloads are only cloned for the hits that survive the limit
        for result in &mut results {
            if let Some(entry) = self.entries.get(&result.id) {
                result.payload = entry.payload.clone();
            }
        }

        Ok(results)
    }

    /// Compute L2 norm of a vector.
    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Compute cosine similarity between two vectors.
    /// Assumes query_norm is precomputed for efficiency.
    fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON {
            return 0.0;
        }

        let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        dot_product / (query_norm * target_norm)
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let mut index = VectorIndex::new(3);
        let embedding = vec![1.0, 0.0, 0.0];

        index.insert(1, embedding.clone(), json!({"word": "a"})).unwrap();

        assert_eq!(index.len(), 1);
        let entry = index.get(1).unwrap();
        assert_eq!(entry.embedding, embedding);
        assert_eq!(entry.payload["word"], "a");
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        let wrong_dims = vec![1.0, 0.0, 0.0, 0.0]; // 4 dims

        let result = index.insert(1, wrong_dims, Value::Null);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_insert_zero_norm_rejected() {
        let mut index = VectorIndex::new(3);

        let result = index.insert(1, vec![0.0, 0.0, 0.0], Value::Null);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_search_basic() {
        let mut index = VectorIndex::new(3);

        // Insert two orthogonal vectors
        index.insert(1, vec![1.0, 0.0, 0.0], json!({"word": "x"})).unwrap();
        index.insert(2, vec![0.0, 1.0, 0.0], json!({"word": "y"})).unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], None, None, 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1); // Should be most similar
        assert_eq!(results[0].payload["word"], "x");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_search_with_threshold() {
        let mut index = VectorIndex::new(3);

        index.insert(1, vec![1.0, 0.0, 0.0], Value::Null).unwrap();
        index.insert(2, vec![0.0, 1.0, 0.0], Value::Null).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], None, Some(0.9), 10).unwrap();

        // Should only return exact match
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
        assert!((results[0].score - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_search_with_limit_sorted_descending() {
        let mut index = VectorIndex::new(3);

        for i in 0..10u64 {
            index
                .insert(i, vec![1.0, i as f32 * 0.1, 0.0], Value::Null)
                .unwrap();
        }

        let results = index.search(&[1.0, 0.0, 0.0], None, None, 3).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[0].id, 0);
    }

    #[test]
    fn test_search_with_payload_filter() {
        let mut index = VectorIndex::new(3);

        index.insert(1, vec![1.0, 0.0, 0.0], json!({"region": "miền Bắc"})).unwrap();
        index.insert(2, vec![0.9, 0.1, 0.0], json!({"region": "miền Nam"})).unwrap();
        index.insert(3, vec![0.8, 0.2, 0.0], json!({"region": null})).unwrap();

        let filter = FieldMatch::new("region", "miền Nam");
        let results = index.search(&[1.0, 0.0, 0.0], Some(&filter), None, 10).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 2);
    }

    #[test]
    fn test_search_zero_query_rejected() {
        let index = VectorIndex::new(2);
        let result = index.search(&[0.0, 0.0], None, None, 5);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }
}
