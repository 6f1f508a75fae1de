//! Qdrant index client
//!
//! One Qdrant collection plays the role of the managed index. Qdrant only
//! accepts UUID or integer point ids, so other ids are mapped to a
//! deterministic UUID and the caller's id is kept in the payload.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use cssa_core::{CssaError, Metadata, MetadataFilter, RemoteIndexConfig, Result, VectorRecord};
use qdrant_client::qdrant::{
    self, Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter,
    GetPointsBuilder, PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

use super::{IndexClient, IndexMatch, QueryRequest};

/// Payload key holding the caller's id
const EXTERNAL_ID_KEY: &str = "external_id";

/// Qdrant collection used as a remote index
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    distance: Distance,
}

impl QdrantIndex {
    /// Create from config
    pub fn from_config(config: &RemoteIndexConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.qdrant_url)
            .timeout(Duration::from_secs(config.timeout_secs));
        if let Some(api_key) = config.api_key.clone().filter(|key| !key.is_empty()) {
            builder = builder.api_key(api_key);
        }

        let client = builder
            .build()
            .map_err(|e| CssaError::Unavailable(format!("Qdrant connection failed: {e}")))?;

        Ok(Self {
            client,
            collection: config.index_name.clone(),
            distance: parse_distance(&config.metric)?,
        })
    }
}

fn parse_distance(metric: &str) -> Result<Distance> {
    match metric.to_lowercase().as_str() {
        "cosine" => Ok(Distance::Cosine),
        "euclidean" | "euclid" => Ok(Distance::Euclid),
        "dotproduct" | "dot" => Ok(Distance::Dot),
        other => Err(CssaError::ConfigError(format!(
            "Unsupported Qdrant metric: {other}"
        ))),
    }
}

fn backend_error(context: &'static str) -> impl Fn(qdrant_client::QdrantError) -> CssaError {
    move |e| CssaError::BackendError(format!("{context}: {e}"))
}

/// Point id for a caller id: the UUID itself, or a name-based UUID
fn point_id(id: &str) -> PointId {
    match Uuid::parse_str(id) {
        Ok(uuid) => PointId::from(uuid.to_string()),
        Err(_) => PointId::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string()),
    }
}

fn point_id_to_string(point_id: &PointId) -> Option<String> {
    match &point_id.point_id_options {
        Some(qdrant::point_id::PointIdOptions::Uuid(uuid)) => Some(uuid.clone()),
        Some(qdrant::point_id::PointIdOptions::Num(num)) => Some(num.to_string()),
        None => None,
    }
}

fn metadata_to_payload(id: &str, metadata: Metadata) -> HashMap<String, QdrantValue> {
    let mut payload: HashMap<String, QdrantValue> = metadata
        .into_iter()
        .map(|(key, value)| (key, value.into()))
        .collect();
    payload.insert(EXTERNAL_ID_KEY.to_string(), id.to_string().into());
    payload
}

/// Split a payload back into the caller id and metadata
fn payload_to_metadata(
    point_id: Option<&PointId>,
    mut payload: HashMap<String, QdrantValue>,
) -> (Option<String>, Metadata) {
    let external_id = payload
        .remove(EXTERNAL_ID_KEY)
        .and_then(qdrant_value_to_json)
        .and_then(|value| value.as_str().map(str::to_string))
        .or_else(|| point_id.and_then(point_id_to_string));

    let metadata = payload
        .into_iter()
        .filter_map(|(key, value)| qdrant_value_to_json(value).map(|value| (key, value)))
        .collect();

    (external_id, metadata)
}

fn qdrant_value_to_json(value: QdrantValue) -> Option<serde_json::Value> {
    use qdrant::value::Kind;

    match value.kind {
        Some(Kind::NullValue(_)) => Some(serde_json::Value::Null),
        Some(Kind::BoolValue(b)) => Some(serde_json::Value::Bool(b)),
        Some(Kind::IntegerValue(i)) => Some(serde_json::Value::Number(i.into())),
        Some(Kind::DoubleValue(f)) => serde_json::Number::from_f64(f).map(serde_json::Value::Number),
        Some(Kind::StringValue(s)) => Some(serde_json::Value::String(s)),
        Some(Kind::ListValue(list)) => Some(serde_json::Value::Array(
            list.values
                .into_iter()
                .filter_map(qdrant_value_to_json)
                .collect(),
        )),
        Some(Kind::StructValue(object)) => Some(serde_json::Value::Object(
            object
                .fields
                .into_iter()
                .filter_map(|(key, value)| qdrant_value_to_json(value).map(|value| (key, value)))
                .collect(),
        )),
        None => None,
    }
}

/// Translate an equality filter into `must` match conditions
fn qdrant_filter(filter: &MetadataFilter) -> Result<Option<Filter>> {
    if filter.is_empty() {
        return Ok(None);
    }

    let conditions = filter
        .conditions()
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok(Condition::matches(key.clone(), s.clone())),
            serde_json::Value::Bool(b) => Ok(Condition::matches(key.clone(), *b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(|i| Condition::matches(key.clone(), i))
                .ok_or_else(|| {
                    CssaError::validation(format!(
                        "filter on '{key}' should be a string, integer or bool"
                    ))
                }),
            _ => Err(CssaError::validation(format!(
                "filter on '{key}' should be a string, integer or bool"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Filter::must(conditions)))
}

#[async_trait]
impl IndexClient for QdrantIndex {
    fn provider(&self) -> &'static str {
        "qdrant"
    }

    async fn ensure_index(&self, dimension: usize) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(backend_error("Failed to list collections"))?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(dimension as u64, self.distance),
                    ),
                )
                .await
                .map_err(backend_error("Failed to create collection"))?;

            tracing::info!(collection = %self.collection, dimension, "created Qdrant collection");
        }

        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| {
                let payload = metadata_to_payload(&record.id, record.metadata);
                PointStruct::new(point_id(&record.id), record.values, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(backend_error("Failed to upsert vectors"))?;

        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<IndexMatch>> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, request.vector, request.top_k as u64)
                .with_payload(true);
        if let Some(filter) = request.filter.as_ref() {
            if let Some(filter) = qdrant_filter(filter)? {
                builder = builder.filter(filter);
            }
        }

        let results = self
            .client
            .search_points(builder)
            .await
            .map_err(backend_error("Vector search failed"))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|point| {
                let (id, metadata) = payload_to_metadata(point.id.as_ref(), point.payload);
                let metadata = if request.include_metadata {
                    metadata
                } else {
                    Metadata::new()
                };
                id.map(|id| IndexMatch {
                    id,
                    score: point.score,
                    metadata,
                })
            })
            .collect())
    }

    async fn fetch(&self, ids: Vec<String>) -> Result<Vec<IndexMatch>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let point_ids: Vec<PointId> = ids.iter().map(|id| point_id(id)).collect();
        let results = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, point_ids).with_payload(true))
            .await
            .map_err(backend_error("Failed to fetch points"))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|point| {
                let (id, metadata) = payload_to_metadata(point.id.as_ref(), point.payload);
                id.map(|id| IndexMatch {
                    id,
                    score: 0.0,
                    metadata,
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(backend_error("Failed to count points"))?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(backend_error("Failed to list collections"))?;

        Ok(collections
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect())
    }
}
