//! Local semantic search building blocks.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed for embedding generation
//! - `index`: In-memory vector index with cosine similarity search
//! - `storage`: Binary file I/O for persisted collections

pub mod embeddings;
mod index;
mod storage;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use index::{FieldMatch, IndexError, VectorIndex};
pub use storage::{VectorStorage, VectorStorageError};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
