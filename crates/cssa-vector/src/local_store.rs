//! Embedded local vector store
//!
//! Persists documents, their metadata and embeddings in an embedded
//! SurrealDB database (SurrealKV engine on disk, or in memory). Similarity
//! ranking and metadata filtering run inside the database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cssa_core::{
    generate_id, CssaError, Document, ErrorPolicy, LocalStoreConfig, Metadata, MetadataFilter,
    Result, ScoredDocument,
};
use serde::{Deserialize, Serialize};
use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;
use tokio::sync::Mutex;

use crate::embedding::EmbeddingClient;
use crate::validation::{
    align_metadata, merge_metadata, resolve_ids, validate_embeddings, validate_metadata,
    validate_query,
};
use crate::VectorDbManager;

const NAMESPACE: &str = "cssa";
const DATABASE: &str = "vectors";

const SEARCH_QUERY: &str = "SELECT doc_id, content, metadata_json, \
     vector::similarity::cosine(embedding, $query) AS score \
     FROM documents WHERE collection = $collection";

/// Local vector store bound to one collection and one embedding client
pub struct LocalStore {
    db: Surreal<Db>,
    collection: String,
    embedder: Arc<dyn EmbeddingClient>,
    error_policy: ErrorPolicy,
    last_ids: Mutex<Vec<String>>,
}

/// Record written for each document.
///
/// `metadata` is queried by filters; `metadata_json` is what reads return.
#[derive(Debug, Clone, Serialize)]
struct DocumentRecord {
    doc_id: String,
    collection: String,
    content: String,
    metadata: Metadata,
    metadata_json: String,
    embedding: Vec<f32>,
}

impl DocumentRecord {
    fn new(
        collection: &str,
        doc_id: String,
        content: String,
        metadata: Metadata,
        embedding: Vec<f32>,
    ) -> Result<Self> {
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| CssaError::validation(format!("metadata is not serializable: {e}")))?;

        Ok(Self {
            doc_id,
            collection: collection.to_string(),
            content,
            metadata,
            metadata_json,
            embedding,
        })
    }
}

/// Row read back from the store
#[derive(Debug, Deserialize)]
struct DocumentRow {
    doc_id: String,
    content: String,
    #[serde(default)]
    metadata_json: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        let metadata = match self.metadata_json.as_deref() {
            None | Some("") => Metadata::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                CssaError::BackendError(format!("Stored metadata is not a map: {e}"))
            })?,
        };

        Ok(Document {
            id: Some(self.doc_id),
            content: self.content,
            metadata,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    total: usize,
}

#[derive(Debug, Deserialize)]
struct CollectionRow {
    name: String,
}

fn db_error(context: &str) -> impl Fn(surrealdb::Error) -> CssaError + '_ {
    move |e| CssaError::BackendError(format!("{context}: {e}"))
}

impl LocalStore {
    /// Open (or create) a persistent store at `path` and bind `collection`
    pub async fn open(
        path: impl AsRef<Path>,
        collection: impl Into<String>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| {
            CssaError::Unavailable(format!(
                "Cannot create store directory {}: {e}",
                path.display()
            ))
        })?;

        let db = Surreal::new::<SurrealKv>(path.display().to_string())
            .await
            .map_err(|e| CssaError::Unavailable(format!("Local store open failed: {e}")))?;

        Self::init(db, collection.into(), embedder).await
    }

    /// Open a store that lives only as long as this value
    pub async fn in_memory(
        collection: impl Into<String>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| CssaError::Unavailable(format!("In-memory store open failed: {e}")))?;

        Self::init(db, collection.into(), embedder).await
    }

    /// Open from config
    pub async fn from_config(
        config: &LocalStoreConfig,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        Ok(Self::open(&config.path, config.collection.clone(), embedder)
            .await?
            .with_error_policy(config.error_policy))
    }

    /// Choose how backend failures are reported
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    async fn init(
        db: Surreal<Db>,
        collection: String,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        if collection.trim().is_empty() {
            return Err(CssaError::validation("collection name should not be empty"));
        }

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(db_error("Local store namespace error"))?;

        db.query(
            "DEFINE INDEX IF NOT EXISTS idx_documents_collection ON documents FIELDS collection;
             UPSERT type::thing('collections', $name) SET name = $name;",
        )
        .bind(("name", collection.clone()))
        .await
        .and_then(|response| response.check())
        .map_err(db_error("Collection init failed"))?;

        tracing::info!(backend = "local", collection = %collection, "opened local collection");

        Ok(Self {
            db,
            collection,
            embedder,
            error_policy: ErrorPolicy::default(),
            last_ids: Mutex::new(Vec::new()),
        })
    }

    /// Bind another collection of the same database, sharing the connection,
    /// embedder and error policy
    pub async fn open_collection(&self, collection: impl Into<String>) -> Result<Self> {
        Ok(
            Self::init(self.db.clone(), collection.into(), self.embedder.clone())
                .await?
                .with_error_policy(self.error_policy),
        )
    }

    /// Collection this store reads and writes
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Ids assigned by the most recent successful upsert
    pub async fn last_ids(&self) -> Vec<String> {
        self.last_ids.lock().await.clone()
    }

    /// Route a failed operation through the error policy
    fn fail<T>(
        &self,
        operation: &'static str,
        error: CssaError,
        default: impl FnOnce() -> T,
    ) -> Result<T> {
        if error.is_validation() {
            tracing::warn!(backend = "local", operation, error = %error, "validation failed");
            return Err(error);
        }

        tracing::error!(backend = "local", operation, error = %error, "backend operation failed");
        match self.error_policy {
            ErrorPolicy::Propagate => Err(error),
            ErrorPolicy::LogAndDefault => Ok(default()),
        }
    }

    fn check_dimension(&self, dimension: usize) -> Result<()> {
        let expected = self.embedder.dimension();
        if dimension != expected {
            return Err(CssaError::validation(format!(
                "vector dimension {dimension} does not match the collection's embedding dimension {expected}"
            )));
        }
        Ok(())
    }

    async fn write_records(&self, records: Vec<DocumentRecord>) -> Result<()> {
        self.db
            .query(
                "FOR $doc IN $docs {
                    UPSERT type::thing('documents', [$doc.collection, $doc.doc_id]) CONTENT $doc;
                };",
            )
            .bind(("docs", records))
            .await
            .and_then(|response| response.check())
            .map_err(db_error("Failed to upsert documents"))?;
        Ok(())
    }

    async fn ranked(
        &self,
        embedding: Vec<f32>,
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DocumentRow>> {
        let (clause, bindings) = filter_clause(filter)?;
        let sql = format!("{SEARCH_QUERY}{clause} ORDER BY score DESC LIMIT $limit");

        let mut query = self
            .db
            .query(sql)
            .bind(("collection", self.collection.clone()))
            .bind(("query", embedding))
            .bind(("limit", limit));
        for binding in bindings {
            query = query.bind(binding);
        }

        query
            .await
            .map_err(db_error("Similarity search failed"))?
            .take(0)
            .map_err(db_error("Result extraction failed"))
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
            ids.push(id);
            contents.push(document.content);
            metadata.push(document.metadata);
        }

        let embeddings = self.embedder.embed_batch(&contents).await?;
        validate_embeddings(&embeddings, contents.len())?;

        let records = ids
            .iter()
            .zip(contents)
            .zip(metadata)
            .zip(embeddings)
            .map(|(((id, content), metadata), embedding)| {
                DocumentRecord::new(&self.collection, id.clone(), content, metadata, embedding)
            })
            .collect::<Result<Vec<_>>>()?;

        self.write_records(records).await?;
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
        // Reject bad filter keys before paying for an embedding
        filter_clause(filter)?;

        let embedding = self.embedder.embed(query).await?;
        let rows = self.ranked(embedding, k, filter).await?;

        rows.into_iter()
            .map(|row| {
                let score = if with_score { row.score } else { None };
                Ok(ScoredDocument {
                    document: row.into_document()?,
                    score,
                })
            })
            .collect()
    }

    async fn try_get_document(&self, id: &str) -> Result<Option<Document>> {
        let rows: Vec<DocumentRow> = self
            .db
            .query(
                "SELECT doc_id, content, metadata_json FROM documents \
                 WHERE collection = $collection AND doc_id = $id LIMIT 1",
            )
            .bind(("collection", self.collection.clone()))
            .bind(("id", id.to_string()))
            .await
            .map_err(db_error("Failed to get document"))?
            .take(0)
            .map_err(db_error("Result extraction failed"))?;

        rows.into_iter().next().map(DocumentRow::into_document).transpose()
    }

    async fn try_count_documents(&self) -> Result<usize> {
        let rows: Vec<CountRow> = self
            .db
            .query(
                "SELECT count() AS total FROM documents WHERE collection = $collection GROUP ALL",
            )
            .bind(("collection", self.collection.clone()))
            .await
            .map_err(db_error("Failed to count documents"))?
            .take(0)
            .map_err(db_error("Result extraction failed"))?;

        Ok(rows.first().map(|row| row.total).unwrap_or(0))
    }

    async fn try_get_all_documents(&self) -> Result<Vec<Document>> {
        let rows: Vec<DocumentRow> = self
            .db
            .query(
                "SELECT doc_id, content, metadata_json FROM documents \
                 WHERE collection = $collection",
            )
            .bind(("collection", self.collection.clone()))
            .await
            .map_err(db_error("Failed to list documents"))?
            .take(0)
            .map_err(db_error("Result extraction failed"))?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn try_list_collections(&self) -> Result<Vec<String>> {
        let rows: Vec<CollectionRow> = self
            .db
            .query("SELECT name FROM collections ORDER BY name")
            .await
            .map_err(db_error("Failed to list collections"))?
            .take(0)
            .map_err(db_error("Result extraction failed"))?;

        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn try_upsert_vectors(
        &self,
        vectors: Vec<(String, Vec<f32>)>,
        metadata: Option<HashMap<String, Metadata>>,
    ) -> Result<usize> {
        let records = merge_metadata(vectors, metadata)?;
        if let Some(first) = records.first() {
            self.check_dimension(first.values.len())?;
        }

        let count = records.len();
        let records = records
            .into_iter()
            .map(|record| {
                DocumentRecord::new(
                    &self.collection,
                    record.id,
                    String::new(),
                    record.metadata,
                    record.values,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        self.write_records(records).await?;
        Ok(count)
    }

    async fn try_search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        validate_query(query_vector, top_k)?;
        self.check_dimension(query_vector.len())?;

        let rows = self.ranked(query_vector.to_vec(), top_k, None).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.doc_id, row.score.unwrap_or_default()))
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

        let records = ids
            .iter()
            .zip(sentences)
            .zip(metadata)
            .zip(embeddings)
            .map(|(((id, content), metadata), embedding)| {
                DocumentRecord::new(&self.collection, id.clone(), content, metadata, embedding)
            })
            .collect::<Result<Vec<_>>>()?;

        self.write_records(records).await?;
        Ok(ids)
    }
}

/// Build the `AND metadata.<key> = $filter_<n>` clause for a filter.
///
/// Keys are spliced into the query text, so only identifier characters are
/// accepted; values are always bound as parameters.
fn filter_clause(
    filter: Option<&MetadataFilter>,
) -> Result<(String, Vec<(String, serde_json::Value)>)> {
    let mut clause = String::new();
    let mut bindings = Vec::new();

    let Some(filter) = filter else {
        return Ok((clause, bindings));
    };

    for (n, (key, value)) in filter.conditions().iter().enumerate() {
        let valid_key = key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            return Err(CssaError::validation(format!(
                "filter key '{key}' should contain only letters, digits and underscores"
            )));
        }

        let param = format!("filter_{n}");
        clause.push_str(&format!(" AND metadata.{key} = ${param}"));
        bindings.push((param, value.clone()));
    }

    Ok((clause, bindings))
}

#[async_trait]
impl VectorDbManager for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upsert_documents(&self, documents: Vec<Document>) -> Result<Vec<String>> {
        tracing::debug!(
            backend = "local",
            collection = %self.collection,
            count = documents.len(),
            "upserting documents"
        );

        match self.try_upsert_documents(documents).await {
            Ok(ids) => {
                tracing::info!(
                    backend = "local",
                    collection = %self.collection,
                    count = ids.len(),
                    "upserted documents"
                );
                *self.last_ids.lock().await = ids.clone();
                Ok(ids)
            }
            Err(e) => self.fail("upsert_documents", e, Vec::new),
        }
    }

    async fn search_documents(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        with_score: bool,
    ) -> Result<Vec<ScoredDocument>> {
        tracing::debug!(backend = "local", k, with_score, "searching documents");

        match self.try_search_documents(query, k, filter, with_score).await {
            Ok(results) => Ok(results),
            Err(e) => self.fail("search_documents", e, Vec::new),
        }
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        match self.try_get_document(id).await {
            Ok(document) => Ok(document),
            Err(e) => self.fail("get_document", e, || None),
        }
    }

    async fn count_documents(&self) -> Result<usize> {
        match self.try_count_documents().await {
            Ok(count) => Ok(count),
            Err(e) => self.fail("count_documents", e, || 0),
        }
    }

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        match self.try_get_all_documents().await {
            Ok(documents) => Ok(documents),
            Err(e) => self.fail("get_all_documents", e, Vec::new),
        }
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        match self.try_list_collections().await {
            Ok(names) => Ok(names),
            Err(e) => self.fail("list_collections", e, Vec::new),
        }
    }

    async fn upsert_vectors(
        &self,
        vectors: Vec<(String, Vec<f32>)>,
        metadata: Option<HashMap<String, Metadata>>,
    ) -> Result<()> {
        if vectors.is_empty() {
            tracing::info!(backend = "local", "no vectors to upsert");
            return Ok(());
        }

        match self.try_upsert_vectors(vectors, metadata).await {
            Ok(count) => {
                tracing::info!(backend = "local", count, "upserted vectors");
                Ok(())
            }
            Err(e) => self.fail("upsert_vectors", e, || ()),
        }
    }

    async fn search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        match self.try_search_similar(query_vector, top_k).await {
            Ok(matches) => Ok(matches),
            Err(e) => self.fail("search_similar", e, Vec::new),
        }
    }

    async fn embed_and_upsert(
        &self,
        sentences: Vec<String>,
        ids: Option<Vec<String>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>> {
        match self.try_embed_and_upsert(sentences, ids, metadata).await {
            Ok(ids) => {
                tracing::info!(backend = "local", count = ids.len(), "embedded and upserted");
                *self.last_ids.lock().await = ids.clone();
                Ok(ids)
            }
            Err(e) => self.fail("embed_and_upsert", e, Vec::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingClient;
    use serde_json::json;

    fn failing_embedder() -> Arc<dyn EmbeddingClient> {
        let mut mock = MockEmbeddingClient::new();
        mock.expect_dimension().return_const(3usize);
        mock.expect_embed_batch()
            .returning(|_| Err(CssaError::Unavailable("connection refused".to_string())));
        mock.expect_embed()
            .returning(|_| Err(CssaError::Unavailable("connection refused".to_string())));
        Arc::new(mock)
    }

    #[test]
    fn test_filter_clause() {
        let filter = MetadataFilter::new()
            .equals("source", "news")
            .equals("year", 2024);
        let (clause, bindings) = filter_clause(Some(&filter)).unwrap();

        assert_eq!(
            clause,
            " AND metadata.source = $filter_0 AND metadata.year = $filter_1"
        );
        assert_eq!(bindings[0], ("filter_0".to_string(), json!("news")));
        assert_eq!(bindings[1], ("filter_1".to_string(), json!(2024)));

        let (clause, bindings) = filter_clause(None).unwrap();
        assert!(clause.is_empty());
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_filter_clause_rejects_unsafe_keys() {
        for key in ["a b", "x; DELETE documents", "1abc", "", "meta.key"] {
            let filter = MetadataFilter::new().equals(key, "v");
            assert!(filter_clause(Some(&filter)).unwrap_err().is_validation());
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates_by_default() {
        let store = LocalStore::in_memory("test", failing_embedder()).await.unwrap();

        let err = store
            .upsert_documents(vec![Document::new("hello")])
            .await
            .unwrap_err();
        assert!(matches!(err, CssaError::Unavailable(_)));
        assert_eq!(store.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_log_and_default_policy_swallows_backend_errors() {
        let store = LocalStore::in_memory("test", failing_embedder())
            .await
            .unwrap()
            .with_error_policy(ErrorPolicy::LogAndDefault);

        let ids = store
            .upsert_documents(vec![Document::new("hello")])
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert!(store.last_ids().await.is_empty());

        let results = store.search_documents("hello", 4, None, false).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_log_and_default_policy_keeps_validation_errors() {
        let store = LocalStore::in_memory("test", failing_embedder())
            .await
            .unwrap()
            .with_error_policy(ErrorPolicy::LogAndDefault);

        let err = store
            .embed_and_upsert(
                vec!["a".to_string(), "b".to_string()],
                None,
                Some(vec![Metadata::new()]),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = store.search_similar(&[0.1, 0.2], 3).await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn test_empty_collection_name_rejected() {
        let result = LocalStore::in_memory("  ", failing_embedder()).await;
        assert!(matches!(result, Err(CssaError::ValidationError(_))));
    }
}
