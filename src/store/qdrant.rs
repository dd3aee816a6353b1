use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, vectors_config::Config as VectorsConfig, Condition,
    CountPointsBuilder, CreateCollectionBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};

use super::*;

/// Remote Qdrant server.
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn connect(url: &str, api_key: Option<&str>) -> Result<Self, StoreError> {
        let mut config = Qdrant::from_url(url);
        if let Some(api_key) = api_key {
            config = config.api_key(api_key.to_string());
        }
        let client = config.build()?;
        log::info!("using qdrant at {url}");

        Ok(Self { client })
    }
}

fn status_from_raw(raw: i32) -> CollectionStatus {
    use qdrant_client::qdrant::CollectionStatus as Raw;

    match Raw::try_from(raw) {
        Ok(Raw::Green) => CollectionStatus::Green,
        Ok(Raw::Yellow) => CollectionStatus::Yellow,
        Ok(Raw::Red) => CollectionStatus::Red,
        Ok(Raw::Grey) => CollectionStatus::Grey,
        _ => CollectionStatus::Unknown,
    }
}

fn payload_to_json(
    payload: std::collections::HashMap<String, qdrant_client::qdrant::Value>,
) -> Value {
    Value::Object(
        payload
            .into_iter()
            .map(|(key, value)| (key, value.into_json()))
            .collect(),
    )
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn mode(&self) -> &'static str {
        "qdrant"
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.client.collection_exists(name).await?)
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        if !self.collection_exists(name).await? {
            return Ok(None);
        }

        let Some(info) = self.client.collection_info(name).await?.result else {
            return Ok(None);
        };

        let vector_size = info
            .config
            .as_ref()
            .and_then(|config| config.params.as_ref())
            .and_then(|params| params.vectors_config.as_ref())
            .and_then(|vectors| vectors.config.as_ref())
            .and_then(|config| match config {
                VectorsConfig::Params(params) => Some(params.size as usize),
                VectorsConfig::ParamsMap(_) => None,
            })
            .unwrap_or_default();

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            status: status_from_raw(info.status),
            points_count: info.points_count.unwrap_or_default(),
            vector_size,
            distance: "Cosine".to_string(),
        }))
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let response = self.client.list_collections().await?;
        let mut names: Vec<String> = response
            .collections
            .into_iter()
            .map(|collection| collection.name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<(), StoreError> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await?;
        log::info!("created collection {name:?} ({dimensions} dimensions, cosine)");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        if self.collection_exists(name).await? {
            self.client.delete_collection(name).await?;
            log::warn!("deleted collection {name:?}");
        }
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<u64, StoreError> {
        if !self.collection_exists(name).await? {
            return Err(StoreError::NotFound(name.to_string()));
        }

        let response = self
            .client
            .count(CountPointsBuilder::new(name).exact(true))
            .await?;
        Ok(response.result.map(|result| result.count).unwrap_or_default())
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<(), StoreError> {
        let points = points
            .into_iter()
            .map(|point| {
                let payload = Payload::try_from(point.payload)?;
                Ok(PointStruct::new(point.id, point.vector, payload))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        request: SearchRequest,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let mut builder = SearchPointsBuilder::new(name, request.vector, request.limit as u64)
            .with_payload(true);
        if let Some(filter) = request.filter {
            builder = builder.filter(Filter::must([Condition::matches(filter.key, filter.value)]));
        }
        if let Some(threshold) = request.score_threshold {
            builder = builder.score_threshold(threshold);
        }

        let response = self.client.search_points(builder).await?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id.and_then(|id| id.point_id_options) {
                    Some(PointIdOptions::Num(id)) => id,
                    other => {
                        log::warn!("skipping point with non-numeric id {other:?}");
                        return None;
                    }
                };
                Some(SearchHit {
                    id,
                    score: point.score,
                    payload: payload_to_json(point.payload),
                })
            })
            .collect())
    }
}
