use crate::error::EngineError;
use crate::models::{Chunk, Document, EngineOptions, TokenSpan};
use sha2::{Digest, Sha256};

/// Tokens are whitespace-separated words; a window of 512 means 512 words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub window_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&EngineOptions::default())
    }
}

impl From<&EngineOptions> for ChunkingConfig {
    fn from(value: &EngineOptions) -> Self {
        Self {
            window_tokens: value.chunk_window_tokens,
            overlap_tokens: value.chunk_overlap_tokens,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_tokens == 0 {
            return Err(EngineError::InvalidChunkConfig(
                "window must hold at least one token".to_string(),
            ));
        }
        if self.overlap_tokens >= self.window_tokens {
            return Err(EngineError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than window {}",
                self.overlap_tokens, self.window_tokens
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.window_tokens - self.overlap_tokens
    }

    /// Lazily yields the spans for a stream of `total` tokens. The iterator is
    /// `Clone`, so a copy taken before iteration replays the same spans.
    pub fn spans(&self, total: usize) -> Result<ChunkSpans, EngineError> {
        self.validate()?;
        Ok(ChunkSpans {
            total,
            window: self.window_tokens,
            step: self.step(),
            next_start: 0,
            finished: total == 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChunkSpans {
    total: usize,
    window: usize,
    step: usize,
    next_start: usize,
    finished: bool,
}

impl Iterator for ChunkSpans {
    type Item = TokenSpan;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let start = self.next_start;
        let end = (start + self.window).min(self.total);
        if end == self.total {
            self.finished = true;
        } else {
            self.next_start = start + self.step;
        }

        Some(TokenSpan { start, end })
    }
}

/// Whitespace token stream of a document, remembering where each page ends.
#[derive(Debug, Clone)]
pub struct TokenStream<'a> {
    tokens: Vec<&'a str>,
    page_ends: Vec<usize>,
}

impl<'a> TokenStream<'a> {
    pub fn from_pages(pages: &'a [String]) -> Self {
        let mut tokens = Vec::new();
        let mut page_ends = Vec::with_capacity(pages.len());
        for page in pages {
            tokens.extend(page.split_whitespace());
            page_ends.push(tokens.len());
        }
        Self { tokens, page_ends }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn text(&self, span: TokenSpan) -> String {
        self.tokens[span.start..span.end].join(" ")
    }

    /// 1-based page number holding the token at `position`.
    pub fn page_of(&self, position: usize) -> u32 {
        let index = self.page_ends.partition_point(|&end| end <= position);
        (index + 1) as u32
    }
}

pub fn build_chunks(document: &Document, config: ChunkingConfig) -> Result<Vec<Chunk>, EngineError> {
    let stream = TokenStream::from_pages(&document.pages);
    if stream.is_empty() {
        return Err(EngineError::EmptyDocument {
            document_id: document.document_id.clone(),
        });
    }

    let chunks = config
        .spans(stream.len())?
        .enumerate()
        .map(|(index, span)| {
            let text = stream.text(span);
            let chunk_index = index as u32;
            Chunk {
                chunk_id: make_chunk_id(document, chunk_index, &text),
                chunk_index,
                span,
                page_start: stream.page_of(span.start),
                page_end: stream.page_of(span.end - 1),
                text,
            }
        })
        .collect();

    Ok(chunks)
}

pub fn document_checksum(document: &Document) -> String {
    let mut hasher = Sha256::new();
    for page in &document.pages {
        hasher.update(page.as_bytes());
        hasher.update([0x0c]);
    }
    format!("{:x}", hasher.finalize())
}

fn make_chunk_id(document: &Document, index: u32, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.owner.as_bytes());
    hasher.update([0]);
    hasher.update(document.document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
