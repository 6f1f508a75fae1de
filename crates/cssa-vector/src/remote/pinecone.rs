//! Pinecone index client
//!
//! Talks to the Pinecone REST API: the control plane resolves (and creates)
//! the index, the data plane at the index host serves vectors.

use std::time::Duration;

use async_trait::async_trait;
use cssa_core::http::http_client;
use cssa_core::{CssaError, Metadata, MetadataFilter, RemoteIndexConfig, Result, VectorRecord};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::{IndexClient, IndexMatch, QueryRequest};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

/// Vectors per upsert request
const UPSERT_BATCH_SIZE: usize = 100;

const READY_POLL_ATTEMPTS: u32 = 60;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Client for one Pinecone serverless index
pub struct PineconeIndex {
    client: Client,
    api_key: String,
    index_name: String,
    cloud: String,
    region: String,
    metric: String,
    control_url: String,
    host: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexName>,
}

#[derive(Debug, Deserialize)]
struct IndexName {
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: ServerlessSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ServerlessSpec<'a> {
    serverless: CloudRegion<'a>,
}

#[derive(Debug, Serialize)]
struct CloudRegion<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<PineconeVector<'a>>,
}

#[derive(Debug, Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    #[serde(skip_serializing_if = "is_empty_metadata")]
    metadata: &'a Metadata,
}

fn is_empty_metadata(metadata: &&Metadata) -> bool {
    metadata.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PineconeQuery<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: std::collections::HashMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    total_vector_count: usize,
}

impl PineconeIndex {
    /// Create a client; nothing is sent until the first call
    pub fn new(
        api_key: impl Into<String>,
        environment: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            index_name: index_name.into(),
            cloud: "aws".to_string(),
            region: environment.into(),
            metric: "cosine".to_string(),
            control_url: CONTROL_PLANE_URL.to_string(),
            host: OnceCell::new(),
        }
    }

    /// Create from config
    pub fn from_config(config: &RemoteIndexConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CssaError::ConfigError("Pinecone API key required".to_string()))?;

        let client = http_client(config.timeout_secs)?;

        let mut index = Self::new(
            api_key.clone(),
            config.environment.clone(),
            config.index_name.clone(),
        );
        index.client = client;
        index.cloud = config.cloud.clone();
        index.metric = config.metric.clone();
        Ok(index)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| CssaError::Unavailable(format!("Pinecone request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CssaError::BackendError(format!(
                "Pinecone error ({status}): {error_text}"
            )));
        }

        Ok(response)
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| CssaError::BackendError(format!("Failed to parse Pinecone response: {e}")))
    }

    /// Describe the index, `None` when it does not exist
    async fn describe(&self) -> Result<Option<IndexDescription>> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/indexes/{}", self.control_url, self.index_name)),
            )
            .send()
            .await
            .map_err(|e| CssaError::Unavailable(format!("Pinecone request failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(Self::parse(response).await?)),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(CssaError::BackendError(format!(
                    "Pinecone error ({status}): {error_text}"
                )))
            }
        }
    }

    async fn create(&self, dimension: usize) -> Result<()> {
        let request = CreateIndexRequest {
            name: &self.index_name,
            dimension,
            metric: &self.metric,
            spec: ServerlessSpec {
                serverless: CloudRegion {
                    cloud: &self.cloud,
                    region: &self.region,
                },
            },
        };

        self.send(
            self.client
                .post(format!("{}/indexes", self.control_url))
                .json(&request),
        )
        .await?;

        tracing::info!(index = %self.index_name, dimension, "created Pinecone index");
        Ok(())
    }

    /// Data plane base URL, resolved once from the control plane
    async fn host(&self) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let description = self.describe().await?.ok_or_else(|| {
                    CssaError::NotFound(format!("Pinecone index '{}'", self.index_name))
                })?;
                Ok::<_, CssaError>(normalize_host(&description.host))
            })
            .await?;
        Ok(host.as_str())
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Translate an equality filter into Pinecone's `$eq` syntax.
///
/// A key constrained more than once is expressed with `$and` so that every
/// condition still applies.
fn pinecone_filter(filter: &MetadataFilter) -> Option<serde_json::Value> {
    if filter.is_empty() {
        return None;
    }

    let conditions = filter.conditions();
    let mut keys = std::collections::HashSet::new();
    let repeated = conditions.iter().any(|(key, _)| !keys.insert(key.as_str()));

    if repeated {
        let clauses = conditions
            .iter()
            .map(|(key, value)| {
                let mut clause = serde_json::Map::new();
                clause.insert(key.clone(), serde_json::json!({ "$eq": value }));
                serde_json::Value::Object(clause)
            })
            .collect::<Vec<_>>();
        return Some(serde_json::json!({ "$and": clauses }));
    }

    let conditions = conditions
        .iter()
        .map(|(key, value)| (key.clone(), serde_json::json!({ "$eq": value })))
        .collect::<serde_json::Map<_, _>>();

    Some(serde_json::Value::Object(conditions))
}

#[async_trait]
impl IndexClient for PineconeIndex {
    fn provider(&self) -> &'static str {
        "pinecone"
    }

    async fn ensure_index(&self, dimension: usize) -> Result<()> {
        if self.describe().await?.is_none() {
            self.create(dimension).await?;
        }

        for _ in 0..READY_POLL_ATTEMPTS {
            if let Some(description) = self.describe().await? {
                if description.status.map(|s| s.ready).unwrap_or(true) {
                    // Seed the host cache while we have it
                    let _ = self.host.set(normalize_host(&description.host));
                    return Ok(());
                }
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Err(CssaError::Unavailable(format!(
            "Pinecone index '{}' did not become ready",
            self.index_name
        )))
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let host = self.host().await?;

        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let request = UpsertRequest {
                vectors: batch
                    .iter()
                    .map(|record| PineconeVector {
                        id: &record.id,
                        values: &record.values,
                        metadata: &record.metadata,
                    })
                    .collect(),
            };

            self.send(
                self.client
                    .post(format!("{host}/vectors/upsert"))
                    .json(&request),
            )
            .await?;

            tracing::debug!(index = %self.index_name, count = batch.len(), "upserted batch");
        }

        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<IndexMatch>> {
        let host = self.host().await?;

        let body = PineconeQuery {
            vector: &request.vector,
            top_k: request.top_k,
            include_metadata: request.include_metadata,
            include_values: false,
            filter: request.filter.as_ref().and_then(pinecone_filter),
        };

        let response = self
            .send(self.client.post(format!("{host}/query")).json(&body))
            .await?;
        let result: QueryResponse = Self::parse(response).await?;

        Ok(result
            .matches
            .into_iter()
            .map(|m| IndexMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn fetch(&self, ids: Vec<String>) -> Result<Vec<IndexMatch>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let host = self.host().await?;
        let params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();

        let response = self
            .send(
                self.client
                    .get(format!("{host}/vectors/fetch"))
                    .query(&params),
            )
            .await?;
        let mut result: FetchResponse = Self::parse(response).await?;

        Ok(ids
            .into_iter()
            .filter_map(|id| {
                result.vectors.remove(&id).map(|vector| IndexMatch {
                    id,
                    score: 0.0,
                    metadata: vector.metadata.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        let host = self.host().await?;

        let response = self
            .send(
                self.client
                    .post(format!("{host}/describe_index_stats"))
                    .json(&serde_json::json!({})),
            )
            .await?;
        let stats: IndexStats = Self::parse(response).await?;

        Ok(stats.total_vector_count)
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let response = self
            .send(self.client.get(format!("{}/indexes", self.control_url)))
            .await?;
        let list: IndexList = Self::parse(response).await?;

        Ok(list.indexes.into_iter().map(|index| index.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_uses_eq_operator() {
        let filter = MetadataFilter::new()
            .equals("genre", "drama")
            .equals("year", 2020);

        assert_eq!(
            pinecone_filter(&filter),
            Some(json!({"genre": {"$eq": "drama"}, "year": {"$eq": 2020}}))
        );
        assert_eq!(pinecone_filter(&MetadataFilter::new()), None);
    }

    #[test]
    fn test_filter_repeated_key_keeps_every_condition() {
        let filter = MetadataFilter::new()
            .equals("genre", "drama")
            .equals("year", 2020)
            .equals("genre", "comedy");

        assert_eq!(
            pinecone_filter(&filter),
            Some(json!({"$and": [
                {"genre": {"$eq": "drama"}},
                {"year": {"$eq": 2020}},
                {"genre": {"$eq": "comedy"}},
            ]}))
        );
    }

    #[test]
    fn test_query_body_shape() {
        let body = PineconeQuery {
            vector: &[0.1, 0.2],
            top_k: 5,
            include_metadata: true,
            include_values: false,
            filter: None,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["topK"], json!(5));
        assert_eq!(value["includeMetadata"], json!(true));
        assert!(value.get("filter").is_none());
    }

    #[test]
    fn test_upsert_body_omits_empty_metadata() {
        let empty = Metadata::new();
        let mut tagged = Metadata::new();
        tagged.insert("meta".to_string(), json!("data1"));

        let body = UpsertRequest {
            vectors: vec![
                PineconeVector {
                    id: "id1",
                    values: &[0.1, 0.2, 0.3],
                    metadata: &tagged,
                },
                PineconeVector {
                    id: "id2",
                    values: &[0.4, 0.5, 0.6],
                    metadata: &empty,
                },
            ],
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["vectors"][0]["metadata"], json!({"meta": "data1"}));
        assert!(value["vectors"][1].get("metadata").is_none());
    }

    #[test]
    fn test_create_request_shape() {
        let request = CreateIndexRequest {
            name: "docs",
            dimension: 384,
            metric: "cosine",
            spec: ServerlessSpec {
                serverless: CloudRegion {
                    cloud: "aws",
                    region: "us-east-1",
                },
            },
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "name": "docs",
                "dimension": 384,
                "metric": "cosine",
                "spec": {"serverless": {"cloud": "aws", "region": "us-east-1"}}
            })
        );
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(
            normalize_host("docs-abc.svc.pinecone.io"),
            "https://docs-abc.svc.pinecone.io"
        );
        assert_eq!(normalize_host("http://localhost:5080/"), "http://localhost:5080");
    }

    #[test]
    fn test_stats_and_match_parsing() {
        let stats: IndexStats =
            serde_json::from_value(json!({"dimension": 384, "totalVectorCount": 42})).unwrap();
        assert_eq!(stats.total_vector_count, 42);

        let response: QueryResponse = serde_json::from_value(json!({
            "matches": [{"id": "id1", "score": 0.9}, {"id": "id2", "score": 0.8, "metadata": {"k": "v"}}]
        }))
        .unwrap();
        assert_eq!(response.matches.len(), 2);
        assert!(response.matches[0].metadata.is_none());
    }

    #[test]
    fn test_from_config_requires_api_key() {
        let config = RemoteIndexConfig::default();
        assert!(matches!(
            PineconeIndex::from_config(&config),
            Err(CssaError::ConfigError(_))
        ));

        let config = RemoteIndexConfig {
            api_key: Some("pc-key".to_string()),
            environment: "eu-west-1".to_string(),
            ..Default::default()
        };
        let index = PineconeIndex::from_config(&config).unwrap();
        assert_eq!(index.region, "eu-west-1");
        assert_eq!(index.index_name, "default-index");
    }
}
