//! [`IndexClient`] backed by a Qdrant collection over gRPC.

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, GetPointsBuilder, NamedVectors,
    PointId, PointStruct, Query, QueryPointsBuilder, SparseVectorParamsBuilder,
    SparseVectorsConfigBuilder, UpsertPointsBuilder, Vector as QdrantVector, VectorInput,
    VectorParamsBuilder, VectorsConfigBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{debug, info};
use uuid::Uuid;

use twider_core::config::IndexConfig;
use twider_core::error::{Result, TwiderError};
use twider_core::types::{IndexPoint, PostPayload, RetrievedPost, ScoredId, Vector};

use crate::index::{CollectionSchema, IndexClient};

/// Qdrant-backed post index.
///
/// Points are keyed by post UUID and carry a named dense vector, a named
/// sparse vector and a `{content, media_urls}` payload.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dense_name: String,
    sparse_name: String,
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("collection", &self.collection)
            .field("dense_name", &self.dense_name)
            .field("sparse_name", &self.sparse_name)
            .finish()
    }
}

impl QdrantIndex {
    /// Build a client for `config.url`. No request is made until first use.
    pub fn connect(config: &IndexConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .build()
            .map_err(|e| TwiderError::Index(format!("Qdrant client for {}: {}", config.url, e)))?;

        info!(url = %config.url, collection = %config.collection, "Qdrant client created");

        Ok(Self {
            client,
            collection: config.collection.clone(),
            dense_name: config.dense_vector_name.clone(),
            sparse_name: config.sparse_vector_name.clone(),
        })
    }

    fn to_point(&self, point: IndexPoint) -> Result<PointStruct> {
        let vectors = NamedVectors::default()
            .add_vector(self.dense_name.clone(), QdrantVector::new_dense(point.dense))
            .add_vector(
                self.sparse_name.clone(),
                QdrantVector::new_sparse(point.sparse.indices, point.sparse.values),
            );
        let payload = Payload::try_from(serde_json::to_value(&point.payload)?)
            .map_err(|e| TwiderError::Index(format!("Payload for {}: {}", point.id, e)))?;
        Ok(PointStruct::new(point.id.to_string(), vectors, payload))
    }
}

fn parse_point_id(id: Option<PointId>) -> Result<Uuid> {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(s)) => Uuid::parse_str(&s)
            .map_err(|e| TwiderError::Index(format!("Invalid point id {}: {}", s, e))),
        Some(PointIdOptions::Num(n)) => Err(TwiderError::Index(format!(
            "Unexpected numeric point id {}",
            n
        ))),
        None => Err(TwiderError::Index("Point without id".to_string())),
    }
}

#[async_trait]
impl IndexClient for QdrantIndex {
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let exists = self
            .client
            .collection_exists(schema.name.clone())
            .await
            .map_err(|e| TwiderError::Index(format!("Collection check failed: {}", e)))?;
        if exists {
            debug!(collection = %schema.name, "Collection already exists");
            return Ok(());
        }

        let mut dense = VectorsConfigBuilder::default();
        dense.add_named_vector_params(
            schema.dense_name.clone(),
            VectorParamsBuilder::new(schema.dense_dim as u64, Distance::Cosine),
        );
        let mut sparse = SparseVectorsConfigBuilder::default();
        sparse.add_named_vector_params(
            schema.sparse_name.clone(),
            SparseVectorParamsBuilder::default(),
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(schema.name.clone())
                    .vectors_config(dense)
                    .sparse_vectors_config(sparse),
            )
            .await
            .map_err(|e| TwiderError::Index(format!("Create collection failed: {}", e)))?;

        info!(
            collection = %schema.name,
            dense_dim = schema.dense_dim,
            "Created collection"
        );
        Ok(())
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let count = points.len();
        let points = points
            .into_iter()
            .map(|p| self.to_point(p))
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
            .await
            .map_err(|e| TwiderError::Index(format!("Upsert failed: {}", e)))?;

        debug!(count, collection = %self.collection, "Upserted points");
        Ok(())
    }

    async fn query(&self, vector: &Vector, limit: u64) -> Result<Vec<ScoredId>> {
        let (input, using) = match vector {
            Vector::Dense(v) => (VectorInput::new_dense(v.clone()), &self.dense_name),
            Vector::Sparse(v) if v.is_empty() => return Ok(Vec::new()),
            Vector::Sparse(v) => (
                VectorInput::new_sparse(v.indices.clone(), v.values.clone()),
                &self.sparse_name,
            ),
        };

        let response = self
            .client
            .query(
                QueryPointsBuilder::new(self.collection.clone())
                    .query(Query::new_nearest(input))
                    .using(using.clone())
                    .limit(limit)
                    .with_payload(false),
            )
            .await
            .map_err(|e| TwiderError::Index(format!("Query on {} failed: {}", using, e)))?;

        response
            .result
            .into_iter()
            .map(|point| {
                Ok(ScoredId {
                    id: parse_point_id(point.id)?,
                    score: point.score as f64,
                })
            })
            .collect()
    }

    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<RetrievedPost>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.to_string())).collect();

        let response = self
            .client
            .get_points(GetPointsBuilder::new(self.collection.clone(), point_ids).with_payload(true))
            .await
            .map_err(|e| TwiderError::Index(format!("Retrieve failed: {}", e)))?;

        let mut found = std::collections::HashMap::with_capacity(response.result.len());
        for point in response.result {
            let id = parse_point_id(point.id)?;
            let payload: serde_json::Map<String, serde_json::Value> = point
                .payload
                .into_iter()
                .map(|(k, v)| (k, v.into_json()))
                .collect();
            let payload: PostPayload = serde_json::from_value(serde_json::Value::Object(payload))
                .map_err(|e| TwiderError::Index(format!("Malformed payload for {}: {}", id, e)))?;
            found.insert(id, payload);
        }

        // Qdrant does not guarantee response order.
        Ok(ids
            .iter()
            .filter_map(|id| {
                found.remove(id).map(|payload| RetrievedPost { id: *id, payload })
            })
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.clone()).exact(true))
            .await
            .map_err(|e| TwiderError::Index(format!("Count failed: {}", e)))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twider_core::types::SparseVector;

    #[test]
    fn test_parse_point_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_point_id(Some(PointId::from(id.to_string()))).unwrap(), id);
        assert!(parse_point_id(Some(PointId::from(7u64))).is_err());
        assert!(parse_point_id(None).is_err());
    }

    #[tokio::test]
    async fn test_to_point_carries_vectors_and_payload() {
        let index = QdrantIndex::connect(&IndexConfig::default()).unwrap();
        let id = Uuid::new_v4();
        let point = index
            .to_point(IndexPoint {
                id,
                dense: vec![0.5, 0.5],
                sparse: SparseVector::from_pairs(vec![(3, 1.0)]),
                payload: PostPayload {
                    content: "hello".into(),
                    media_urls: vec!["m1".into()],
                },
            })
            .unwrap();

        assert_eq!(
            point.id.and_then(|p| p.point_id_options),
            Some(PointIdOptions::Uuid(id.to_string()))
        );
        assert_eq!(
            point.payload.get("content").map(|v| v.clone().into_json()),
            Some(serde_json::json!("hello"))
        );
        assert!(point.vectors.is_some());
    }
}
