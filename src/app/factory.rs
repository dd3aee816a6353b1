use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    app::service::SearchService,
    config::{Config, StoreMode},
    keywords::{ChatKeywordExtractor, KeywordExtractor},
    semantic::{Embedder, EmbeddingModel},
    store::{EmbeddedStore, QdrantStore, VectorStore},
};

/// Builds the process-wide collaborators once at startup.
pub struct AppFactory;

impl AppFactory {
    /// Create the search service described by `config`.
    ///
    /// Fails when the configured collection exists with a vector width the
    /// embedding model does not produce.
    pub async fn create_service(config: &Config) -> Result<SearchService> {
        let embedder = Self::create_embedder(config).await?;
        let store = Self::create_store(config)?;

        let mut service = SearchService::new(
            embedder,
            store,
            config.collection.clone(),
            config.search.clone(),
        );

        if let Some(extractor) = Self::create_keyword_extractor(config)? {
            service = service.with_keywords(extractor);
        }

        service
            .check_compatibility()
            .await
            .context("Collection is incompatible with the embedding model")?;

        Ok(service)
    }

    /// Load the embedding model on the blocking pool (first use downloads it).
    pub async fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
        let model_name = config.embedding.model.clone();
        let cache_dir = config.model_cache_dir();

        let model = tokio::task::spawn_blocking(move || EmbeddingModel::new(&model_name, cache_dir))
            .await
            .context("Embedding model loader panicked")?
            .context("Failed to initialize embedding model")?;

        log::info!(
            "embedding model '{}' ready ({} dimensions)",
            model.name(),
            model.dimensions()
        );
        Ok(Arc::new(model))
    }

    pub fn create_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
        match config.store_mode()? {
            StoreMode::Embedded { path } => {
                log::info!("using embedded vector store at {}", path.display());
                let store =
                    EmbeddedStore::open(path).context("Failed to open embedded vector store")?;
                Ok(Arc::new(store))
            }
            StoreMode::Remote { url, api_key } => {
                let store = QdrantStore::connect(&url, api_key.as_deref())
                    .context("Failed to create qdrant client")?;
                Ok(Arc::new(store))
            }
        }
    }

    pub fn create_keyword_extractor(config: &Config) -> Result<Option<Arc<dyn KeywordExtractor>>> {
        if !config.keywords.enabled {
            return Ok(None);
        }

        let api_key = config
            .keywords
            .api_key
            .as_deref()
            .context("LLM_API_KEY must be set when keyword extraction is enabled")?;

        log::info!(
            "keyword extraction enabled ({} via {})",
            config.keywords.model,
            config.keywords.base_url
        );
        let extractor = ChatKeywordExtractor::new(&config.keywords, api_key)?;
        Ok(Some(Arc::new(extractor)))
    }
}
