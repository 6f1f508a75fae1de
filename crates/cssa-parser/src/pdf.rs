//! PDF document parser using pdf-extract

use std::path::Path;

use crate::{DocumentParseMetadata, DocumentParser, FileType, ParsedDocument, ParserError, Result};

/// Longest first line still accepted as a title
const MAX_TITLE_CHARS: usize = 200;

/// PDF document parser
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfParser;

impl PdfParser {
    pub fn new() -> Self {
        Self
    }

    /// Extract text and an estimated page count from PDF bytes
    pub fn extract_text_from_bytes(&self, bytes: &[u8]) -> Result<(String, Option<u32>)> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ParserError::PdfError(e.to_string()))?;

        // Pages are separated by form feeds in the extracted text
        let breaks = text.matches('\x0C').count() as u32;
        let page_count = (breaks > 0).then_some(breaks + 1);

        Ok((text, page_count))
    }

    fn extract_text(&self, path: &Path) -> Result<(String, Option<u32>)> {
        let bytes = std::fs::read(path).map_err(|e| ParserError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        self.extract_text_from_bytes(&bytes)
    }
}

/// First non-empty line, if it is short enough to be a title
fn detect_title(text: &str) -> Option<String> {
    text.lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\x0C'))
        .find(|line| !line.is_empty())
        .filter(|line| line.chars().count() < MAX_TITLE_CHARS)
        .map(str::to_string)
}

impl DocumentParser for PdfParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let (text, page_count) = self.extract_text(path)?;

        tracing::debug!(
            path = %path.display(),
            chars = text.chars().count(),
            pages = ?page_count,
            "extracted pdf text"
        );

        let metadata = DocumentParseMetadata {
            title: detect_title(&text),
            page_count,
        };

        Ok(ParsedDocument {
            file_path: path.display().to_string(),
            file_type: FileType::Pdf,
            content: text,
            metadata,
        })
    }

    fn supported_types(&self) -> &[FileType] {
        &[FileType::Pdf]
    }
}
