//! CSSA Vector - Vector database managers
//!
//! Provides one contract, [`VectorDbManager`], over two kinds of backend:
//! - [`LocalStore`]: an embedded on-disk store that takes documents and
//!   embeds them with the client bound at construction
//! - [`RemoteIndexManager`]: a managed index (Pinecone or Qdrant) fed with
//!   raw `(id, embedding)` pairs and an id-keyed metadata map
//!
//! The two backends return different search shapes: [`VectorDbManager::search_similar`]
//! yields `(id, score)` pairs, [`VectorDbManager::search_documents`] yields
//! documents with an optional score.

use std::collections::HashMap;

use async_trait::async_trait;
use cssa_core::{CssaError, Document, Metadata, MetadataFilter, Result, ScoredDocument};

pub mod embedding;
pub mod local_store;
pub mod remote;
pub mod validation;

pub use embedding::{create_embedding_client, EmbeddingClient, OllamaEmbedding, OpenAiEmbedding};
pub use local_store::LocalStore;
pub use remote::{
    connect_index, IndexClient, IndexMatch, PineconeIndex, QdrantIndex, QueryRequest,
    RemoteIndexManager,
};

/// Uniform operation set every vector backend exposes.
///
/// Each method defaults to [`CssaError::Unsupported`]; a backend overrides
/// the operations it can serve.
#[async_trait]
pub trait VectorDbManager: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Insert documents, generating ids for those without one.
    ///
    /// Returns the ids in input order.
    async fn upsert_documents(&self, documents: Vec<Document>) -> Result<Vec<String>> {
        let _ = documents;
        Err(CssaError::Unsupported("upsert_documents"))
    }

    /// Top-`k` documents closest to `query`, optionally narrowed by metadata
    /// equality, with the similarity score when `with_score` is set
    async fn search_documents(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        with_score: bool,
    ) -> Result<Vec<ScoredDocument>> {
        let _ = (query, k, filter, with_score);
        Err(CssaError::Unsupported("search_documents"))
    }

    /// Fetch a single document by id
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let _ = id;
        Err(CssaError::Unsupported("get_document"))
    }

    /// Number of stored documents
    async fn count_documents(&self) -> Result<usize> {
        Err(CssaError::Unsupported("count_documents"))
    }

    /// Every stored document
    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        Err(CssaError::Unsupported("get_all_documents"))
    }

    /// Names of the collections (or indexes) known to the backend
    async fn list_collections(&self) -> Result<Vec<String>> {
        Err(CssaError::Unsupported("list_collections"))
    }

    /// Upsert `(id, embedding)` pairs, attaching `metadata[id]` (or an empty
    /// map) to each
    async fn upsert_vectors(
        &self,
        vectors: Vec<(String, Vec<f32>)>,
        metadata: Option<HashMap<String, Metadata>>,
    ) -> Result<()> {
        let _ = (vectors, metadata);
        Err(CssaError::Unsupported("upsert_vectors"))
    }

    /// At most `top_k` `(id, score)` pairs in the backend's ranking order
    async fn search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let _ = (query_vector, top_k);
        Err(CssaError::Unsupported("search_similar"))
    }

    /// Embed `sentences` and upsert them, returning the ids in input order
    async fn embed_and_upsert(
        &self,
        sentences: Vec<String>,
        ids: Option<Vec<String>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>> {
        let _ = (sentences, ids, metadata);
        Err(CssaError::Unsupported("embed_and_upsert"))
    }
}
