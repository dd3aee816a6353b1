use crate::{
    dataset::DatasetError, keywords::KeywordError, semantic::EmbeddingError, store::StoreError,
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid admin token")]
    Unauthorized,

    #[error("collection {0:?} does not exist")]
    CollectionNotFound(String),

    #[error("collection {collection:?} stores {existing}-dimensional vectors but the embedding model produces {requested}; recreate the collection or switch models")]
    DimensionMismatch {
        collection: String,
        existing: usize,
        requested: usize,
    },

    #[error("keyword extraction is disabled")]
    KeywordsDisabled,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    Store(StoreError),

    #[error("keyword extraction error: {0}")]
    Keywords(#[from] KeywordError),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => AppError::CollectionNotFound(name),
            err => AppError::Store(err),
        }
    }
}
