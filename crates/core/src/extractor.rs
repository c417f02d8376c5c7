use crate::error::EngineError;
use crate::models::Document;
use lopdf::Document as PdfDocument;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PageExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, EngineError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PageExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, EngineError> {
        let document =
            PdfDocument::load(path).map_err(|error| EngineError::DocumentRead(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| EngineError::DocumentRead(error.to_string()))?;
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// UTF-8 text files; form feeds separate pages.
#[derive(Default)]
pub struct PlainTextExtractor;

impl PageExtractor for PlainTextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(split_pages(&raw))
    }
}

pub fn split_pages(raw: &str) -> Vec<PageText> {
    raw.split('\u{000c}')
        .enumerate()
        .map(|(index, text)| PageText {
            number: (index + 1) as u32,
            text: text.to_string(),
        })
        .collect()
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, EngineError> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        LopdfExtractor.extract_pages(path)
    } else {
        PlainTextExtractor.extract_pages(path)
    }
}

/// Reads `path` into a [`Document`]. Page order follows the source; empty
/// pages are kept so page numbers stay aligned with the file.
pub fn load_document(
    owner: &str,
    document_id: &str,
    path: &Path,
) -> Result<Document, EngineError> {
    let mut pages = extract_page_texts(path)?;
    pages.sort_by_key(|page| page.number);
    Ok(Document::new(
        owner,
        document_id,
        pages.into_iter().map(|page| page.text).collect(),
    ))
}
