//! Managed remote index adapter
//!
//! [`RemoteIndexManager`] validates and shapes requests; the wire work is
//! delegated to an [`IndexClient`] (Pinecone or Qdrant).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cssa_core::{
    generate_id, CssaError, Document, Metadata, MetadataFilter, RemoteIndexConfig, Result,
    ScoredDocument, VectorProvider, VectorRecord,
};

use crate::embedding::EmbeddingClient;
use crate::validation::{
    align_metadata, merge_metadata, resolve_ids, validate_embeddings, validate_metadata,
    validate_query,
};
use crate::VectorDbManager;

pub mod pinecone;
pub mod qdrant;

pub use pinecone::PineconeIndex;
pub use qdrant::QdrantIndex;

/// Metadata key holding the original text of a document
pub const TEXT_KEY: &str = "text";

/// Query sent to a remote index
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub include_metadata: bool,
    pub filter: Option<MetadataFilter>,
}

impl QueryRequest {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            include_metadata: true,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<MetadataFilter>) -> Self {
        self.filter = filter;
        self
    }
}

/// A ranked (or fetched) entry returned by a remote index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Network client for one managed index
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Provider name for logging
    fn provider(&self) -> &'static str;

    /// Create the index with `dimension` if it does not exist yet
    async fn ensure_index(&self, dimension: usize) -> Result<()>;

    /// Upsert records, metadata included
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Ranked matches for a query vector, best first
    async fn query(&self, request: QueryRequest) -> Result<Vec<IndexMatch>>;

    /// Records by id; unknown ids are skipped
    async fn fetch(&self, ids: Vec<String>) -> Result<Vec<IndexMatch>>;

    /// Total number of stored vectors
    async fn count(&self) -> Result<usize>;

    /// Names of the indexes visible to the credentials
    async fn list_indexes(&self) -> Result<Vec<String>>;
}

/// Connect to the configured provider, creating the index when allowed
pub async fn connect_index(
    config: &RemoteIndexConfig,
    embedder: Arc<dyn EmbeddingClient>,
) -> Result<RemoteIndexManager> {
    let client: Box<dyn IndexClient> = match config.provider {
        VectorProvider::Pinecone => Box::new(PineconeIndex::from_config(config)?),
        VectorProvider::Qdrant => Box::new(QdrantIndex::from_config(config)?),
    };

    if embedder.dimension() != config.dimension {
        tracing::warn!(
            index = %config.index_name,
            index_dimension = config.dimension,
            embedding_dimension = embedder.dimension(),
            "index dimension differs from the embedding model"
        );
    }

    if config.create_if_missing {
        client.ensure_index(config.dimension).await?;
    }

    tracing::info!(
        provider = client.provider(),
        index = %config.index_name,
        "connected to remote index"
    );

    Ok(RemoteIndexManager::new(
        client,
        embedder,
        config.index_name.clone(),
    ))
}

/// Vector manager over a managed remote index
pub struct RemoteIndexManager {
    client: Box<dyn IndexClient>,
    embedder: Arc<dyn EmbeddingClient>,
    index_name: String,
}

impl RemoteIndexManager {
    pub fn new(
        client: Box<dyn IndexClient>,
        embedder: Arc<dyn EmbeddingClient>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            embedder,
            index_name: index_name.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Log a failed operation and hand the error back unchanged
    fn report<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_validation() {
                tracing::warn!(
                    backend = self.client.provider(),
                    index = %self.index_name,
                    operation,
                    error = %e,
                    "validation failed"
                );
            } else {
                tracing::error!(
                    backend = self.client.provider(),
                    index = %self.index_name,
                    operation,
                    error = %e,
                    "remote operation failed"
                );
            }
        }
        result
    }

    async fn try_upsert_vectors(
        &self,
        vectors: Vec<(String, Vec<f32>)>,
        metadata: Option<HashMap<String, Metadata>>,
    ) -> Result<()> {
        let records = merge_metadata(vectors, metadata)?;
        let count = records.len();
        self.client.upsert(records).await?;

        tracing::info!(
            backend = self.client.provider(),
            index = %self.index_name,
            count,
            "upserted vectors"
        );
        Ok(())
    }

    async fn try_search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        validate_query(query_vector, top_k)?;

        let matches = self
            .client
            .query(QueryRequest::new(query_vector.to_vec(), top_k))
            .await?;

        Ok(matches
            .into_iter()
            .take(top_k)
            .map(|m| (m.id, m.score))
            .collect())
    }

    async fn try_embed_and_upsert(
        &self,
        sentences: Vec<String>,
        ids: Option<Vec<String>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>> {
        let ids = resolve_ids(ids, sentences.len())?;
        let metadata = align_metadata(metadata, sentences.len())?;
        if sentences.is_empty() {
            return Ok(ids);
        }

        let embeddings = self.embedder.embed_batch(&sentences).await?;
        validate_embeddings(&embeddings, sentences.len())?;

        let vectors = ids.iter().cloned().zip(embeddings).collect();
        let metadata = ids.iter().cloned().zip(metadata).collect();
        self.try_upsert_vectors(vectors, Some(metadata)).await?;

        Ok(ids)
    }

    async fn try_upsert_documents(&self, documents: Vec<Document>) -> Result<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(documents.len());
        let mut contents = Vec::with_capacity(documents.len());
        let mut metadata = Vec::with_capacity(documents.len());
        for document in documents {
            validate_metadata(&document.metadata)?;
            let id = document.id.unwrap_or_else(generate_id);
            if id.is_empty() {
                return Err(CssaError::validation("document id should not be empty"));
            }
            let mut meta = document.metadata;
            meta.insert(
                TEXT_KEY.to_string(),
                serde_json::Value::String(document.content.clone()),
            );
            ids.push(id);
            contents.push(document.content);
            metadata.push(meta);
        }

        let embeddings = self.embedder.embed_batch(&contents).await?;
        validate_embeddings(&embeddings, contents.len())?;

        let records = ids
            .iter()
            .zip(embeddings)
            .zip(metadata)
            .map(|((id, values), meta)| VectorRecord::new(id.clone(), values, meta))
            .collect();
        self.client.upsert(records).await?;

        Ok(ids)
    }

    async fn try_search_documents(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        with_score: bool,
    ) -> Result<Vec<ScoredDocument>> {
        if k == 0 {
            return Err(CssaError::validation("k should be greater than zero"));
        }

        let embedding = self.embedder.embed(query).await?;
        let request = QueryRequest::new(embedding, k).with_filter(filter.cloned());
        let matches = self.client.query(request).await?;

        Ok(matches
            .into_iter()
            .take(k)
            .map(|m| {
                let score = with_score.then_some(m.score);
                ScoredDocument {
                    document: match_to_document(m),
                    score,
                }
            })
            .collect())
    }
}

fn match_to_document(m: IndexMatch) -> Document {
    let mut metadata = m.metadata;
    let content = match metadata.remove(TEXT_KEY) {
        Some(serde_json::Value::String(text)) => text,
        Some(other) => {
            metadata.insert(TEXT_KEY.to_string(), other);
            String::new()
        }
        None => String::new(),
    };

    Document {
        id: Some(m.id),
        content,
        metadata,
    }
}

#[async_trait]
impl VectorDbManager for RemoteIndexManager {
    fn name(&self) -> &str {
        self.client.provider()
    }

    async fn upsert_documents(&self, documents: Vec<Document>) -> Result<Vec<String>> {
        tracing::debug!(
            backend = self.client.provider(),
            count = documents.len(),
            "upserting documents"
        );
        let result = self.try_upsert_documents(documents).await;
        self.report("upsert_documents", result)
    }

    async fn search_documents(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        with_score: bool,
    ) -> Result<Vec<ScoredDocument>> {
        tracing::debug!(backend = self.client.provider(), k, with_score, "searching documents");
        let result = self.try_search_documents(query, k, filter, with_score).await;
        self.report("search_documents", result)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let result = self.client.fetch(vec![id.to_string()]).await;
        let matches = self.report("get_document", result)?;
        Ok(matches
            .into_iter()
            .find(|m| m.id == id)
            .map(match_to_document))
    }

    async fn count_documents(&self) -> Result<usize> {
        let result = self.client.count().await;
        self.report("count_documents", result)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let result = self.client.list_indexes().await;
        self.report("list_collections", result)
    }

    async fn upsert_vectors(
        &self,
        vectors: Vec<(String, Vec<f32>)>,
        metadata: Option<HashMap<String, Metadata>>,
    ) -> Result<()> {
        if vectors.is_empty() {
            tracing::info!(backend = self.client.provider(), "no vectors to upsert");
            return Ok(());
        }

        tracing::debug!(
            backend = self.client.provider(),
            count = vectors.len(),
            "upserting vectors"
        );
        let result = self.try_upsert_vectors(vectors, metadata).await;
        self.report("upsert_vectors", result)
    }

    async fn search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let result = self.try_search_similar(query_vector, top_k).await;
        self.report("search_similar", result)
    }

    async fn embed_and_upsert(
        &self,
        sentences: Vec<String>,
        ids: Option<Vec<String>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>> {
        tracing::debug!(
            backend = self.client.provider(),
            count = sentences.len(),
            "embedding and upserting sentences"
        );
        let result = self.try_embed_and_upsert(sentences, ids, metadata).await;
        self.report("embed_and_upsert", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingClient;
    use mockall::predicate::eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, serde_json::Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn index_client() -> MockIndexClient {
        let mut client = MockIndexClient::new();
        client.expect_provider().return_const("mock");
        client
    }

    fn embedder_returning(embeddings: Vec<Vec<f32>>) -> Arc<dyn EmbeddingClient> {
        let mut embedder = MockEmbeddingClient::new();
        embedder.expect_dimension().return_const(2usize);
        embedder
            .expect_embed_batch()
            .times(1)
            .returning(move |_| Ok(embeddings.clone()));
        Arc::new(embedder)
    }

    fn unused_embedder() -> Arc<dyn EmbeddingClient> {
        let mut embedder = MockEmbeddingClient::new();
        embedder.expect_dimension().return_const(2usize);
        embedder.expect_embed_batch().never();
        embedder.expect_embed().never();
        Arc::new(embedder)
    }

    fn manager(client: MockIndexClient, embedder: Arc<dyn EmbeddingClient>) -> RemoteIndexManager {
        RemoteIndexManager::new(Box::new(client), embedder, "test-index")
    }

    #[tokio::test]
    async fn test_upsert_vectors_forwards_merged_records() {
        let mut client = index_client();
        client
            .expect_upsert()
            .with(eq(vec![
                VectorRecord::new("id1", vec![0.1, 0.2, 0.3], meta(&[("meta", json!("data1"))])),
                VectorRecord::new("id2", vec![0.4, 0.5, 0.6], Metadata::new()),
            ]))
            .times(1)
            .returning(|_| Ok(()));

        let manager = manager(client, unused_embedder());
        manager
            .upsert_vectors(
                vec![
                    ("id1".to_string(), vec![0.1, 0.2, 0.3]),
                    ("id2".to_string(), vec![0.4, 0.5, 0.6]),
                ],
                Some(HashMap::from([(
                    "id1".to_string(),
                    meta(&[("meta", json!("data1"))]),
                )])),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_vectors_empty_is_noop() {
        let mut client = index_client();
        client.expect_upsert().never();

        let manager = manager(client, unused_embedder());
        manager.upsert_vectors(Vec::new(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_vectors_rejects_before_network() {
        let mut client = index_client();
        client.expect_upsert().never();
        let manager = manager(client, unused_embedder());

        let err = manager
            .upsert_vectors(vec![(String::new(), vec![0.1])], None)
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = manager
            .upsert_vectors(
                vec![("id1".to_string(), vec![0.1])],
                Some(HashMap::from([(
                    "id1".to_string(),
                    meta(&[("nested", json!({"a": 1}))]),
                )])),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dictionary of scalar values"));
    }

    #[tokio::test]
    async fn test_upsert_vectors_reraises_backend_error() {
        let mut client = index_client();
        client
            .expect_upsert()
            .times(1)
            .returning(|_| Err(CssaError::BackendError("quota exceeded".to_string())));

        let manager = manager(client, unused_embedder());
        let err = manager
            .upsert_vectors(vec![("id1".to_string(), vec![0.1])], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CssaError::BackendError(msg) if msg == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_search_similar_preserves_order() {
        let mut client = index_client();
        client
            .expect_query()
            .withf(|request| {
                request.vector == vec![0.1, 0.2, 0.3]
                    && request.top_k == 2
                    && request.include_metadata
                    && request.filter.is_none()
            })
            .times(1)
            .returning(|_| {
                Ok(vec![
                    IndexMatch {
                        id: "id1".to_string(),
                        score: 0.9,
                        metadata: Metadata::new(),
                    },
                    IndexMatch {
                        id: "id2".to_string(),
                        score: 0.8,
                        metadata: Metadata::new(),
                    },
                ])
            });

        let manager = manager(client, unused_embedder());
        let results = manager.search_similar(&[0.1, 0.2, 0.3], 2).await.unwrap();

        assert_eq!(
            results,
            vec![("id1".to_string(), 0.9), ("id2".to_string(), 0.8)]
        );
    }

    #[tokio::test]
    async fn test_search_similar_truncates_to_top_k() {
        let mut client = index_client();
        client.expect_query().returning(|_| {
            Ok((0..5)
                .map(|i| IndexMatch {
                    id: format!("id{i}"),
                    score: 1.0 - i as f32 * 0.1,
                    metadata: Metadata::new(),
                })
                .collect())
        });

        let manager = manager(client, unused_embedder());
        let results = manager.search_similar(&[0.1], 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "id0");

        assert!(manager.search_similar(&[0.1], 0).await.is_err());
    }

    #[tokio::test]
    async fn test_embed_and_upsert_generates_aligned_ids() {
        let mut client = index_client();
        client
            .expect_upsert()
            .withf(|records| {
                records.len() == 2
                    && records[0].values == vec![0.1, 0.2]
                    && records[1].values == vec![0.3, 0.4]
                    && records.iter().all(|r| r.metadata.is_empty())
            })
            .times(1)
            .returning(|_| Ok(()));

        let manager = manager(client, embedder_returning(vec![vec![0.1, 0.2], vec![0.3, 0.4]]));
        let ids = manager
            .embed_and_upsert(
                vec!["test sentence 1".to_string(), "test sentence 2".to_string()],
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_embed_and_upsert_keys_metadata_by_id() {
        let mut client = index_client();
        client
            .expect_upsert()
            .withf(|records| {
                records[0].id == "a"
                    && records[0].metadata == meta(&[("text", json!("test1"))])
                    && records[1].id == "b"
                    && records[1].metadata == meta(&[("text", json!("test2"))])
            })
            .times(1)
            .returning(|_| Ok(()));

        let manager = manager(client, embedder_returning(vec![vec![0.1, 0.2], vec![0.3, 0.4]]));
        let ids = manager
            .embed_and_upsert(
                vec!["one".to_string(), "two".to_string()],
                Some(vec!["a".to_string(), "b".to_string()]),
                Some(vec![
                    meta(&[("text", json!("test1"))]),
                    meta(&[("text", json!("test2"))]),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_embed_and_upsert_repeated_id_uses_last_metadata() {
        let mut client = index_client();
        client
            .expect_upsert()
            .withf(|records| {
                records.len() == 2
                    && records
                        .iter()
                        .all(|r| r.id == "a" && r.metadata == meta(&[("text", json!("second"))]))
            })
            .times(1)
            .returning(|_| Ok(()));

        let manager = manager(client, embedder_returning(vec![vec![0.1, 0.2], vec![0.3, 0.4]]));
        manager
            .embed_and_upsert(
                vec!["one".to_string(), "two".to_string()],
                Some(vec!["a".to_string(), "a".to_string()]),
                Some(vec![
                    meta(&[("text", json!("first"))]),
                    meta(&[("text", json!("second"))]),
                ]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_embed_and_upsert_metadata_mismatch_fails_fast() {
        let mut client = index_client();
        client.expect_upsert().never();

        let manager = manager(client, unused_embedder());
        let err = manager
            .embed_and_upsert(
                vec!["test1".to_string(), "test2".to_string()],
                None,
                Some(vec![meta(&[("text", json!("test1"))])]),
            )
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("same length as sentences"));
    }

    #[tokio::test]
    async fn test_embed_and_upsert_rejects_bad_embeddings() {
        let mut client = index_client();
        client.expect_upsert().never();

        let manager = manager(client, embedder_returning(vec![vec![0.1, 0.2]]));
        let err = manager
            .embed_and_upsert(vec!["a".to_string(), "b".to_string()], None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("embeddings should be a list of vectors"));
    }

    #[tokio::test]
    async fn test_documents_round_trip_through_text_key() {
        let mut client = index_client();
        client
            .expect_upsert()
            .withf(|records| {
                records.len() == 1
                    && records[0].id == "doc-1"
                    && records[0].metadata.get(TEXT_KEY) == Some(&json!("hello world"))
                    && records[0].metadata.get("source") == Some(&json!("news"))
            })
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_query()
            .withf(|request| {
                request.top_k == 1
                    && request.filter == Some(MetadataFilter::new().equals("source", "news"))
            })
            .times(1)
            .returning(|_| {
                Ok(vec![IndexMatch {
                    id: "doc-1".to_string(),
                    score: 0.75,
                    metadata: meta(&[
                        (TEXT_KEY, json!("hello world")),
                        ("source", json!("news")),
                    ]),
                }])
            });

        let mut embedder = MockEmbeddingClient::new();
        embedder.expect_dimension().return_const(2usize);
        embedder
            .expect_embed_batch()
            .returning(|texts| Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect()));
        embedder.expect_embed().returning(|_| Ok(vec![0.5, 0.5]));

        let manager = manager(client, Arc::new(embedder));
        let ids = manager
            .upsert_documents(vec![Document::new("hello world")
                .with_id("doc-1")
                .with_metadata("source", "news")])
            .await
            .unwrap();
        assert_eq!(ids, vec!["doc-1".to_string()]);

        let filter = MetadataFilter::new().equals("source", "news");
        let results = manager
            .search_documents("hello", 1, Some(&filter), true)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, Some(0.75));
        assert_eq!(results[0].document.content, "hello world");
        assert!(!results[0].document.metadata.contains_key(TEXT_KEY));
    }

    #[tokio::test]
    async fn test_get_all_documents_unsupported() {
        let manager = manager(index_client(), unused_embedder());
        let err = manager.get_all_documents().await.unwrap_err();
        assert!(matches!(err, CssaError::Unsupported("get_all_documents")));
    }

    #[tokio::test]
    async fn test_get_document_by_fetch() {
        let mut client = index_client();
        client
            .expect_fetch()
            .with(eq(vec!["doc-9".to_string()]))
            .returning(|_| Ok(Vec::new()));

        let manager = manager(client, unused_embedder());
        assert!(manager.get_document("doc-9").await.unwrap().is_none());
    }

    fn vector_batch() -> impl Strategy<Value = Vec<(String, Vec<f32>)>> {
        (1usize..8).prop_flat_map(|dimension| {
            prop::collection::btree_map(
                "[a-z0-9]{1,12}",
                prop::collection::vec(-1.0f32..1.0, dimension),
                1..16,
            )
            .prop_map(|m| m.into_iter().collect::<Vec<_>>())
        })
    }

    proptest! {
        #[test]
        fn prop_upsert_vectors_forwards_one_record_per_pair(
            vectors in vector_batch(),
            with_meta in prop::collection::vec(any::<bool>(), 16),
        ) {
            let metadata: HashMap<String, Metadata> = vectors
                .iter()
                .zip(&with_meta)
                .filter(|(_, keep)| **keep)
                .map(|((id, _), _)| (id.clone(), meta(&[("source", json!(id))])))
                .collect();

            let expected: Vec<VectorRecord> = vectors
                .iter()
                .map(|(id, values)| {
                    let m = metadata.get(id).cloned().unwrap_or_default();
                    VectorRecord::new(id.clone(), values.clone(), m)
                })
                .collect();

            let mut client = index_client();
            client
                .expect_upsert()
                .with(eq(expected))
                .times(1)
                .returning(|_| Ok(()));

            let manager = manager(client, unused_embedder());
            let result = tokio_test::block_on(manager.upsert_vectors(vectors, Some(metadata)));
            prop_assert!(result.is_ok());
        }
    }
}
