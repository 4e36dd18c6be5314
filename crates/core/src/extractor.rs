use crate::chunking::normalize_whitespace;
use crate::error::SchemeError;
use lopdf::Document;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub pages: Vec<PageText>,
}

impl ExtractedDocument {
    pub fn has_text(&self) -> bool {
        self.pages.iter().any(|page| !page.text.trim().is_empty())
    }

    /// Normalizes each page and joins the non-empty ones with a single
    /// newline, keeping a map from char offsets back to page numbers.
    pub fn layout(&self) -> PageLayout {
        let mut text = String::new();
        let mut starts = Vec::new();
        let mut cursor = 0usize;

        for page in &self.pages {
            let normalized = normalize_whitespace(&page.text);
            if normalized.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
                cursor += 1;
            }
            starts.push((cursor, page.number));
            cursor += normalized.chars().count();
            text.push_str(&normalized);
        }

        PageLayout { text, starts }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLayout {
    pub text: String,
    starts: Vec<(usize, u32)>,
}

impl PageLayout {
    /// Page containing the char at `offset`; page 1 when nothing is known.
    pub fn page_at(&self, offset: usize) -> u32 {
        let index = self.starts.partition_point(|(start, _)| *start <= offset);
        index
            .checked_sub(1)
            .and_then(|position| self.starts.get(position))
            .map_or(1, |(_, page)| *page)
    }
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<ExtractedDocument, SchemeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<ExtractedDocument, SchemeError> {
        if bytes.is_empty() {
            return Err(SchemeError::Extraction("document is empty".to_string()));
        }

        let document =
            Document::load_mem(bytes).map_err(|error| SchemeError::Extraction(error.to_string()))?;

        if document.is_encrypted() {
            return Err(SchemeError::Extraction(
                "document is encrypted".to_string(),
            ));
        }

        let numbers: Vec<u32> = document.get_pages().into_keys().collect();
        if numbers.is_empty() {
            return Err(SchemeError::Extraction(
                "document has no pages".to_string(),
            ));
        }

        let pages = numbers
            .into_iter()
            .map(|number| {
                let text = document.extract_text(&[number]).unwrap_or_else(|error| {
                    warn!(page = number, %error, "page text could not be decoded");
                    String::new()
                });
                PageText { number, text }
            })
            .collect();

        Ok(ExtractedDocument { pages })
    }
}
