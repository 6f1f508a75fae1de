//! PDF directory ingestion into a vector store

use std::path::{Path, PathBuf};

use anyhow::Context;
use cssa_core::Document;
use cssa_parser::{chunk_text, ChunkConfig, FileType, ParsedDocument, ParserRegistry};
use cssa_vector::VectorDbManager;

/// Outcome of one ingestion run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: usize,
    pub chunks: usize,
}

/// PDF files directly inside `dir`, sorted by name
pub fn pdf_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && FileType::from_path(&path) == FileType::Pdf {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Chunk a parsed file into documents tagged with its file name
pub fn chunk_documents(
    parsed: &ParsedDocument,
    config: &ChunkConfig,
) -> anyhow::Result<Vec<Document>> {
    let filename = parsed.file_name();
    let chunks = chunk_text(&parsed.content, config)?;

    Ok(chunks
        .into_iter()
        .map(|chunk| Document::new(chunk).with_metadata("filename", filename.as_str()))
        .collect())
}

/// Parse, chunk and upsert every PDF in `dir`
pub async fn ingest_dir(
    dir: &Path,
    registry: &ParserRegistry,
    store: &dyn VectorDbManager,
    config: &ChunkConfig,
) -> anyhow::Result<IngestSummary> {
    let files = pdf_files(dir)?;
    if files.is_empty() {
        tracing::warn!(dir = %dir.display(), "no pdf files found");
        return Ok(IngestSummary::default());
    }

    let mut summary = IngestSummary::default();
    for path in &files {
        let parsed = registry
            .parse(path)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let documents = chunk_documents(&parsed, config)?;
        let count = documents.len();
        if count > 0 {
            store.upsert_documents(documents).await?;
        }

        tracing::info!(file = %parsed.file_name(), chunks = count, "ingested file");
        summary.files += 1;
        summary.chunks += count;
    }

    tracing::info!(
        files = summary.files,
        chunks = summary.chunks,
        store = store.name(),
        "ingestion finished"
    );
    Ok(summary)
}
