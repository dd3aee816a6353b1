use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::semantic::{VectorIndex, VectorStorage};

use super::*;

const FILE_EXTENSION: &str = "bin";

/// In-process vector store.
///
/// Every collection is a `VectorIndex` kept in memory and, unless the store is
/// memory-only, mirrored to `<dir>/<collection>.bin` after each write.
///
/// Writers build a new index next to the live one and swap it in once it is on
/// disk, so searches never wait for file I/O.
pub struct EmbeddedStore {
    dir: Option<PathBuf>,
    collections: RwLock<HashMap<String, Arc<VectorIndex>>>,
    /// Serialises create, delete and upsert.
    writes: Mutex<()>,
}

impl EmbeddedStore {
    /// Open a store rooted at `dir`, loading every persisted collection.
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir).map_err(VectorStorageError::from)?;

        let mut collections = HashMap::new();
        for entry in std::fs::read_dir(&dir).map_err(VectorStorageError::from)? {
            let path = entry.map_err(VectorStorageError::from)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let index = VectorStorage::new(path.clone()).load()?;
            log::info!("loaded collection {name:?} with {} points", index.len());
            collections.insert(name.to_string(), Arc::new(index));
        }

        Ok(Self {
            dir: Some(dir),
            collections: RwLock::new(collections),
            writes: Mutex::new(()),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            collections: RwLock::new(HashMap::new()),
            writes: Mutex::new(()),
        }
    }

    fn storage(&self, name: &str) -> Option<VectorStorage> {
        self.dir
            .as_ref()
            .map(|dir| VectorStorage::new(dir.join(format!("{name}.{FILE_EXTENSION}"))))
    }

    /// Write the collection file on the blocking pool.
    async fn persist(&self, name: &str, index: Arc<VectorIndex>) -> Result<(), StoreError> {
        let Some(storage) = self.storage(name) else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || storage.save(&index))
            .await
            .map_err(|err| StoreError::Other(format!("persist task failed: {err}")))??;
        Ok(())
    }

    /// Snapshot of a collection. The lock is released before returning.
    fn get(&self, name: &str) -> Result<Option<Arc<VectorIndex>>, StoreError> {
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        Ok(collections.get(name).cloned())
    }

    fn swap(&self, name: &str, index: Option<Arc<VectorIndex>>) -> Result<(), StoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        match index {
            Some(index) => collections.insert(name.to_string(), index),
            None => collections.remove(name),
        };
        Ok(())
    }

    fn poisoned() -> StoreError {
        StoreError::Other("collection lock poisoned".to_string())
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::Other(format!("invalid collection name {name:?}")))
    }
}

#[async_trait]
impl VectorStore for EmbeddedStore {
    fn mode(&self) -> &'static str {
        "embedded"
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.get(name)?.is_some())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        Ok(self.get(name)?.map(|index| CollectionInfo {
            name: name.to_string(),
            status: CollectionStatus::Green,
            points_count: index.len() as u64,
            vector_size: index.dimensions(),
            distance: "Cosine".to_string(),
        }))
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<(), StoreError> {
        validate_name(name)?;
        let _writes = self.writes.lock().await;
        if self.get(name)?.is_some() {
            return Err(StoreError::Other(format!("collection {name:?} already exists")));
        }

        let index = Arc::new(VectorIndex::new(dimensions));
        self.persist(name, Arc::clone(&index)).await?;
        self.swap(name, Some(index))?;
        log::info!("created collection {name:?} ({dimensions} dimensions, cosine)");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let _writes = self.writes.lock().await;
        if let Some(storage) = self.storage(name) {
            tokio::task::spawn_blocking(move || storage.delete())
                .await
                .map_err(|err| StoreError::Other(format!("delete task failed: {err}")))??;
        }
        if self.get(name)?.is_some() {
            self.swap(name, None)?;
            log::warn!("deleted collection {name:?}");
        }
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<u64, StoreError> {
        self.get(name)?
            .map(|index| index.len() as u64)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<(), StoreError> {
        let _writes = self.writes.lock().await;
        let current = self
            .get(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        // validate the whole batch on a copy so a bad point leaves nothing behind
        let mut updated = VectorIndex::clone(&current);
        for point in points {
            updated.insert(point.id, point.vector, point.payload)?;
        }

        let updated = Arc::new(updated);
        self.persist(name, Arc::clone(&updated)).await?;
        self.swap(name, Some(updated))
    }

    async fn search(
        &self,
        name: &str,
        request: SearchRequest,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let index = self
            .get(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let results = index.search(
            &request.vector,
            request.filter.as_ref(),
            request.score_threshold,
            request.limit,
        )?;

        Ok(results
            .into_iter()
            .map(|result| SearchHit {
                id: result.id,
                score: result.score,
                payload: result.payload,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::FieldMatch;
    use serde_json::json;

    fn point(id: u64, vector: Vec<f32>, region: &str) -> Point {
        Point {
            id,
            vector,
            payload: json!({"word": format!("w{id}"), "region": region}),
        }
    }

    #[tokio::test]
    async fn test_create_upsert_count() {
        let store = EmbeddedStore::in_memory();
        assert!(!store.collection_exists("signs").await.unwrap());

        store.create_collection("signs", 2).await.unwrap();
        store
            .upsert(
                "signs",
                vec![
                    point(0, vec![1.0, 0.0], "miền Bắc"),
                    point(1, vec![0.0, 1.0], "miền Nam"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.count("signs").await.unwrap(), 2);
        let info = store.collection_info("signs").await.unwrap().unwrap();
        assert_eq!(info.vector_size, 2);
        assert_eq!(info.points_count, 2);
        assert_eq!(info.status, CollectionStatus::Green);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = EmbeddedStore::in_memory();

        assert!(store.collection_info("nope").await.unwrap().is_none());
        assert!(matches!(store.count("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.upsert("nope", vec![]).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_point_leaves_collection_untouched() {
        let store = EmbeddedStore::in_memory();
        store.create_collection("signs", 2).await.unwrap();

        let result = store
            .upsert(
                "signs",
                vec![point(0, vec![1.0, 0.0], "miền Bắc"), point(1, vec![1.0, 0.0, 0.0], "")],
            )
            .await;

        assert!(matches!(result, Err(StoreError::Index(_))));
        assert_eq!(store.count("signs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_with_filter() {
        let store = EmbeddedStore::in_memory();
        store.create_collection("signs", 2).await.unwrap();
        store
            .upsert(
                "signs",
                vec![
                    point(0, vec![1.0, 0.0], "miền Bắc"),
                    point(1, vec![0.9, 0.1], "miền Nam"),
                    point(2, vec![0.0, 1.0], "miền Nam"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "signs",
                SearchRequest {
                    vector: vec![1.0, 0.0],
                    limit: 5,
                    filter: Some(FieldMatch::new("region", "miền Nam")),
                    score_threshold: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(hits[0].payload["word"], "w1");
    }

    #[tokio::test]
    async fn test_recreate_resets_count() {
        let store = EmbeddedStore::in_memory();
        store.create_collection("signs", 2).await.unwrap();
        store
            .upsert("signs", vec![point(0, vec![1.0, 0.0], "")])
            .await
            .unwrap();

        store.recreate_collection("signs", 3).await.unwrap();

        let info = store.collection_info("signs").await.unwrap().unwrap();
        assert_eq!(info.points_count, 0);
        assert_eq!(info.vector_size, 3);
    }

    #[tokio::test]
    async fn test_persisted_collections_reload() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = EmbeddedStore::open(dir.path().to_path_buf()).unwrap();
            store.create_collection("signs", 2).await.unwrap();
            store
                .upsert("signs", vec![point(7, vec![0.6, 0.8], "miền Trung")])
                .await
                .unwrap();
        }

        let store = EmbeddedStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["signs".to_string()]);
        assert_eq!(store.count("signs").await.unwrap(), 1);

        store.delete_collection("signs").await.unwrap();
        let store = EmbeddedStore::open(dir.path().to_path_buf()).unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_searches_run_alongside_persisted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EmbeddedStore::open(dir.path().to_path_buf()).unwrap());
        store.create_collection("signs", 2).await.unwrap();
        store
            .upsert("signs", vec![point(0, vec![1.0, 0.0], "")])
            .await
            .unwrap();

        let writers: Vec<_> = (1..=8u64)
            .map(|id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .upsert("signs", vec![point(id, vec![1.0, id as f32], "")])
                        .await
                })
            })
            .collect();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let request = SearchRequest {
                        vector: vec![1.0, 0.0],
                        limit: 3,
                        ..Default::default()
                    };
                    store.search("signs", request).await
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        for reader in readers {
            assert!(!reader.await.unwrap().unwrap().is_empty());
        }

        assert_eq!(store.count("signs").await.unwrap(), 9);
        let reopened = EmbeddedStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.count("signs").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let store = EmbeddedStore::in_memory();
        assert!(store.create_collection("../escape", 2).await.is_err());
    }
}
