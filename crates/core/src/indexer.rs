use crate::chunking::{build_chunks, document_checksum, ChunkingConfig, TokenStream};
use crate::embeddings::Embedder;
use crate::models::{CollectionKey, Document, IndexReport, IndexedChunk};
use crate::traits::VectorIndex;
use crate::EngineError;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Result<Self, EngineError> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            index,
            chunking,
            batch_size: batch_size.max(1),
        })
    }

    /// Chunks, embeds and publishes `document`, replacing any earlier index of
    /// the same key. Nothing is published unless every chunk was embedded.
    pub async fn index(&self, document: &Document) -> Result<IndexReport, EngineError> {
        let key = document.key();
        let chunks = build_chunks(document, self.chunking)?;
        let token_count = TokenStream::from_pages(&document.pages).len();

        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(EngineError::EmbeddingService(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != self.embedder.dimensions() {
                    return Err(EngineError::DimensionMismatch {
                        expected: self.embedder.dimensions(),
                        actual: vector.len(),
                    });
                }
                entries.push(IndexedChunk {
                    chunk: chunk.clone(),
                    vector,
                });
            }
            debug!(collection = %key, embedded = entries.len(), total = chunks.len(), "embedded batch");
        }

        let chunk_count = entries.len();
        self.index
            .replace_collection(&key, self.embedder.model_id(), entries)
            .await?;

        info!(collection = %key, chunk_count, token_count, "document indexed");

        Ok(IndexReport {
            key,
            chunk_count,
            token_count,
            checksum: document_checksum(document),
            indexed_at: Utc::now(),
        })
    }

    pub async fn delete(&self, key: &CollectionKey) -> Result<bool, EngineError> {
        let removed = self.index.delete_collection(key).await?;
        info!(collection = %key, removed, "document index deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::MemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call after the first `healthy_calls`.
    struct FlakyEmbedder {
        inner: CharacterNgramEmbedder,
        healthy_calls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_calls {
                return Err(EngineError::EmbeddingService("unavailable".to_string()));
            }
            self.inner.embed(text).await
        }
    }

    fn words(count: usize) -> String {
        (0..count)
            .map(|index| format!("term{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn small_chunks() -> ChunkingConfig {
        ChunkingConfig {
            window_tokens: 10,
            overlap_tokens: 2,
        }
    }

    #[tokio::test]
    async fn reindex_replaces_previous_content() -> Result<(), EngineError> {
        let store = Arc::new(MemoryVectorStore::new());
        let indexer = Indexer::new(
            Arc::new(CharacterNgramEmbedder::default()),
            store.clone(),
            small_chunks(),
            4,
        )?;

        let report = indexer
            .index(&Document::from_text("alice", "doc", &words(50)))
            .await?;
        assert_eq!(report.chunk_count, 6);
        assert_eq!(report.token_count, 50);

        let report = indexer
            .index(&Document::from_text("alice", "doc", &words(5)))
            .await?;
        assert_eq!(report.chunk_count, 1);

        let info = store.collection_info(&CollectionKey::new("alice", "doc")).await?;
        assert_eq!(info.map(|info| info.size), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_leaves_previous_collection_visible() -> Result<(), EngineError> {
        let store = Arc::new(MemoryVectorStore::new());
        let key = CollectionKey::new("alice", "doc");

        let healthy = Indexer::new(
            Arc::new(CharacterNgramEmbedder::default()),
            store.clone(),
            small_chunks(),
            4,
        )?;
        healthy
            .index(&Document::from_text("alice", "doc", &words(5)))
            .await?;

        let flaky = Indexer::new(
            Arc::new(FlakyEmbedder {
                inner: CharacterNgramEmbedder::default(),
                healthy_calls: 3,
                calls: AtomicUsize::new(0),
            }),
            store.clone(),
            small_chunks(),
            2,
        )?;
        let result = flaky
            .index(&Document::from_text("alice", "doc", &words(50)))
            .await;

        assert!(matches!(result, Err(EngineError::EmbeddingService(_))));
        let info = store.collection_info(&key).await?;
        assert_eq!(info.map(|info| info.size), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_embedding() -> Result<(), EngineError> {
        let store = Arc::new(MemoryVectorStore::new());
        let indexer = Indexer::new(
            Arc::new(CharacterNgramEmbedder::default()),
            store.clone(),
            small_chunks(),
            4,
        )?;

        let result = indexer.index(&Document::from_text("alice", "doc", " \n ")).await;
        assert!(matches!(result, Err(EngineError::EmptyDocument { .. })));
        assert!(store
            .collection_info(&CollectionKey::new("alice", "doc"))
            .await?
            .is_none());
        Ok(())
    }
}
