//! CSSA Parser - Document parsing and chunking for ingestion
//!
//! Supports parsing of:
//! - PDF documents
//! - Markdown files
//! - Plain text files
//!
//! Each parser implements the `DocumentParser` trait and produces
//! a `ParsedDocument`; `chunk_text` then splits its content into
//! overlapping pieces sized for embedding.

use std::path::Path;
use thiserror::Error;

pub mod pdf;

pub use pdf::PdfParser;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during document parsing
#[derive(Error, Debug)]
pub enum ParserError {
    /// File format is not supported
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// IO error while reading the file
    #[error("IO error reading file: {path}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// PDF parsing error
    #[error("PDF parsing error: {0}")]
    PdfError(String),

    /// Chunk size and overlap do not fit together
    #[error("Invalid chunk configuration: {0}")]
    InvalidChunkConfig(String),
}

pub type Result<T> = std::result::Result<T, ParserError>;

// ============================================================================
// Parsed Document Types
// ============================================================================

/// A parsed document with extracted content
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Original file path
    pub file_path: String,

    /// Detected file type
    pub file_type: FileType,

    /// Extracted text content
    pub content: String,

    /// Metadata extracted from the document
    pub metadata: DocumentParseMetadata,
}

impl ParsedDocument {
    /// Create a new parsed document
    pub fn new(file_path: impl Into<String>, file_type: FileType) -> Self {
        Self {
            file_path: file_path.into(),
            file_type,
            content: String::new(),
            metadata: DocumentParseMetadata::default(),
        }
    }

    /// Set content
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// File name component of the path
    pub fn file_name(&self) -> String {
        Path::new(&self.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.clone())
    }

    /// Get total character count
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Supported file types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Markdown,
    PlainText,
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "md" | "markdown" => Self::Markdown,
            "txt" => Self::PlainText,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from path
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Markdown => write!(f, "markdown"),
            Self::PlainText => write!(f, "text"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metadata extracted during parsing
#[derive(Debug, Clone, Default)]
pub struct DocumentParseMetadata {
    /// Document title
    pub title: Option<String>,

    /// Number of pages
    pub page_count: Option<u32>,
}

// ============================================================================
// Parser Trait
// ============================================================================

/// Trait for document parsers
pub trait DocumentParser: Send + Sync {
    /// Parse a document from a file path
    fn parse(&self, path: &Path) -> Result<ParsedDocument>;

    /// Get supported file types
    fn supported_types(&self) -> &[FileType];

    /// Check if this parser can handle a file type
    fn can_parse(&self, file_type: FileType) -> bool {
        self.supported_types().contains(&file_type)
    }
}

// ============================================================================
// Chunking
// ============================================================================

/// Separators tried in order: paragraphs, lines, words, characters
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            chunk_overlap: 300,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ParserError::InvalidChunkConfig(
                "chunk_size should be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap > self.chunk_size {
            return Err(ParserError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) is larger than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split text into chunks of at most `chunk_size` characters where possible,
/// preferring paragraph, then line, then word boundaries, with
/// `chunk_overlap` characters carried between neighbours.
///
/// A piece that cannot be split further by any separator is kept whole.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Result<Vec<String>> {
    config.validate()?;
    Ok(split_recursive(text, &DEFAULT_SEPARATORS, config))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split on `separator`, keeping it at the start of the following piece
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn split_recursive(text: &str, separators: &[&str], config: &ChunkConfig) -> Vec<String> {
    // First separator present in the text; "" always matches
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let remaining = separators.get(position + 1..).unwrap_or(&[]);

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in split_keep_separator(text, separator) {
        if char_len(piece) < config.chunk_size {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, config));
            pending.clear();
        }

        if remaining.is_empty() {
            chunks.push(piece.to_string());
        } else {
            chunks.extend(split_recursive(piece, remaining, config));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, config));
    }

    chunks
}

/// Greedily join small pieces into chunks, keeping an overlapping tail
fn merge_pieces(pieces: &[&str], config: &ChunkConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > config.chunk_size && !window.is_empty() {
            push_trimmed(&mut chunks, &window);

            while total > config.chunk_overlap
                || (total + len > config.chunk_size && total > 0)
            {
                match window.pop_front() {
                    Some(first) => total -= char_len(first),
                    None => break,
                }
            }
        }

        window.push_back(piece);
        total += len;
    }

    push_trimmed(&mut chunks, &window);
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, window: &std::collections::VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

// ============================================================================
// Parser Registry
// ============================================================================

/// Registry of available parsers
pub struct ParserRegistry {
    parsers: Vec<Box<dyn DocumentParser>>,
}

impl ParserRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Registry with the PDF and plain text parsers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PdfParser::new());
        registry.register(PlainTextParser);
        registry
    }

    /// Register a parser
    pub fn register<P: DocumentParser + 'static>(&mut self, parser: P) {
        self.parsers.push(Box::new(parser));
    }

    /// Find a parser for a file type
    pub fn find_parser(&self, file_type: FileType) -> Option<&dyn DocumentParser> {
        self.parsers
            .iter()
            .find(|p| p.can_parse(file_type))
            .map(|p| p.as_ref())
    }

    /// Parse a file using the appropriate parser
    pub fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let file_type = FileType::from_path(path);

        if file_type == FileType::Unknown {
            return Err(ParserError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("none")
                    .to_string(),
            ));
        }

        let parser = self
            .find_parser(file_type)
            .ok_or_else(|| ParserError::UnsupportedFormat(file_type.to_string()))?;

        tracing::info!(path = %path.display(), file_type = %file_type, "parsing file");
        parser.parse(path)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain text parser
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let content = std::fs::read_to_string(path).map_err(|e| ParserError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Ok(
            ParsedDocument::new(path.display().to_string(), FileType::from_path(path))
                .with_content(content),
        )
    }

    fn supported_types(&self) -> &[FileType] {
        &[FileType::PlainText, FileType::Markdown]
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_extension("pdf"), FileType::Pdf);
        assert_eq!(FileType::from_extension("PDF"), FileType::Pdf);
        assert_eq!(FileType::from_extension("md"), FileType::Markdown);
        assert_eq!(FileType::from_extension("docx"), FileType::Unknown);
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("  A short note.  ", &ChunkConfig::new(100, 10)).unwrap();
        assert_eq!(chunks, vec!["A short note."]);

        assert!(chunk_text("", &ChunkConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn test_paragraphs_split_first() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let chunks = chunk_text(text, &ChunkConfig::new(30, 0)).unwrap();

        assert_eq!(
            chunks,
            vec![
                "First paragraph here.",
                "Second paragraph here.",
                "Third one."
            ]
        );
    }

    #[test]
    fn test_word_split_with_overlap() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunk_text(text, &ChunkConfig::new(15, 5)).unwrap();

        // "six" fits in the overlap window, "three" does not
        assert_eq!(
            chunks,
            vec!["one two three", "four five six", "six seven", "eight nine ten"]
        );
    }

    #[test]
    fn test_long_word_falls_back_to_characters() {
        let chunks = chunk_text(&"x".repeat(25), &ChunkConfig::new(10, 0)).unwrap();
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn test_multibyte_text_is_never_cut_mid_character() {
        let text = "안녕하세요 세계 ".repeat(40);
        let chunks = chunk_text(&text, &ChunkConfig::new(12, 4)).unwrap();
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
    }

    #[test]
    fn test_invalid_chunk_config() {
        assert!(matches!(
            chunk_text("text", &ChunkConfig::new(10, 20)),
            Err(ParserError::InvalidChunkConfig(_))
        ));
        assert!(chunk_text("text", &ChunkConfig::new(0, 0)).is_err());
    }

    #[test]
    fn test_registry_parses_text_files() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, "hello from a text file").unwrap();

        let registry = ParserRegistry::with_defaults();
        let doc = registry.parse(file.path()).unwrap();
        assert_eq!(doc.file_type, FileType::PlainText);
        assert_eq!(doc.content, "hello from a text file");
        assert!(doc.file_name().ends_with(".txt"));
    }

    #[test]
    fn test_registry_rejects_unknown_format() {
        let registry = ParserRegistry::with_defaults();
        let err = registry.parse(Path::new("report.docx")).unwrap_err();
        assert!(matches!(err, ParserError::UnsupportedFormat(ext) if ext == "docx"));
    }

    proptest! {
        #[test]
        fn prop_chunks_respect_size_for_splittable_text(
            words in prop::collection::vec("[a-zé가-힣]{1,8}", 0..200),
            chunk_size in 10usize..60,
            overlap_ratio in 0usize..50,
        ) {
            let text = words.join(" ");
            let config = ChunkConfig::new(chunk_size, chunk_size * overlap_ratio / 100);
            let chunks = chunk_text(&text, &config).unwrap();

            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= chunk_size);
                prop_assert!(!chunk.is_empty());
            }

            let original: String = text.split_whitespace().collect();
            let covered: String = chunks.concat().split_whitespace().collect();
            prop_assert!(covered.len() >= original.len());
        }
    }
}
